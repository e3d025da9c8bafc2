//! Condition checks.
//!
//! One type per condition kind, each implementing [`ConditionCheck`]. A stored
//! [`Condition`] is turned into a boxed check once, when the rule set is
//! compiled, so the hot path only runs `evaluate`.
//!
//! # Design Decisions
//! - Operator and value are parsed at compile time; a condition that cannot
//!   be compiled (unknown kind, unsupported operator, malformed value) becomes
//!   a [`Never`] check rather than an error
//! - Text comparisons are case-insensitive, cookie and query values are not
//! - CIDR containment is IPv4 only

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{Datelike, Timelike};
use regex::{Regex, RegexBuilder};

use crate::conditions::context::RequestContext;
use crate::rules::types::Condition;

/// A compiled, request-time predicate.
pub trait ConditionCheck: Send + Sync + fmt::Debug {
    /// Returns true if the request satisfies this condition.
    fn evaluate(&self, ctx: &RequestContext) -> bool;
}

/// Build the check for a stored condition.
///
/// Returns an error message describing why the condition can never pass.
pub fn compile_condition(condition: &Condition) -> Result<Box<dyn ConditionCheck>, String> {
    let op = condition.operator.trim().to_ascii_lowercase();
    let op = if op.is_empty() { "equals".to_string() } else { op };
    let value = condition.value.trim();
    let kind = condition.kind.trim().to_ascii_lowercase();

    let unsupported = || format!("operator '{}' is not supported for '{}'", op, kind);

    let check: Box<dyn ConditionCheck> = match kind.as_str() {
        "user_agent" => Box::new(HeaderCheck::new("user-agent", &op, value).ok_or_else(unsupported)?),
        "referrer" => Box::new(HeaderCheck::new("referer", &op, value).ok_or_else(unsupported)?),
        "login_status" => Box::new(LoginStatusCheck::new(value).ok_or_else(|| {
            format!("login_status expects 'logged_in' or 'logged_out', got '{}'", value)
        })?),
        "user_role" => Box::new(RoleCheck {
            role: value.to_string(),
            negate: op == "not_equals",
        }),
        "device_type" => Box::new(DeviceCheck::new(value).ok_or_else(|| {
            format!("device_type expects mobile, tablet or desktop, got '{}'", value)
        })?),
        "language" => Box::new(LanguageCheck::new(&op, value).ok_or_else(unsupported)?),
        "cookie" => Box::new(
            KeyValueCheck::new(KeySource::Cookie, &op, &condition.value).ok_or_else(unsupported)?,
        ),
        "query_param" => Box::new(
            KeyValueCheck::new(KeySource::Query, &op, &condition.value).ok_or_else(unsupported)?,
        ),
        "ip_range" => Box::new(IpCheck::new(&op, value)?),
        "server_name" => Box::new(ServerNameCheck::new(&op, value).ok_or_else(unsupported)?),
        "request_method" => {
            if op != "equals" {
                return Err(unsupported());
            }
            Box::new(MethodCheck {
                method: value.to_ascii_uppercase(),
            })
        }
        "time_range" => Box::new(TimeRangeCheck::parse(value).ok_or_else(|| {
            format!("time_range expects 'HH:MM-HH:MM', got '{}'", value)
        })?),
        "day_of_week" => Box::new(DayOfWeekCheck::new(&op, value)),
        other => return Err(format!("unknown condition type '{}'", other)),
    };
    Ok(check)
}

/// A condition that never passes.
#[derive(Debug, Clone)]
pub struct Never {
    pub reason: String,
}

impl ConditionCheck for Never {
    fn evaluate(&self, _ctx: &RequestContext) -> bool {
        false
    }
}

/// String test used by header conditions.
#[derive(Debug)]
pub enum TextOp {
    Contains(String),
    NotContains(String),
    Equals(String),
    /// `None` when the pattern failed to compile.
    Regex(Option<Regex>),
}

impl TextOp {
    pub fn parse(operator: &str, value: &str) -> Option<Self> {
        let op = match operator {
            "contains" => TextOp::Contains(value.to_lowercase()),
            "not_contains" => TextOp::NotContains(value.to_lowercase()),
            "equals" => TextOp::Equals(value.to_lowercase()),
            "regex" => TextOp::Regex(compile_condition_regex(value)),
            _ => return None,
        };
        Some(op)
    }

    pub fn test(&self, haystack: &str) -> bool {
        match self {
            TextOp::Contains(needle) => haystack.to_lowercase().contains(needle.as_str()),
            TextOp::NotContains(needle) => !haystack.to_lowercase().contains(needle.as_str()),
            TextOp::Equals(expected) => haystack.to_lowercase() == *expected,
            TextOp::Regex(Some(re)) => re.is_match(haystack),
            TextOp::Regex(None) => false,
        }
    }
}

/// Compile a regex condition value.
///
/// Accepts a bare pattern or a `/pattern/flags` literal (flags `i`, `m`, `s`,
/// `x`, `u`). Matching is always case-insensitive.
pub fn compile_condition_regex(value: &str) -> Option<Regex> {
    let (pattern, flags) = split_regex_literal(value).unwrap_or((value, ""));

    let mut builder = RegexBuilder::new(pattern);
    builder.case_insensitive(true);
    for flag in flags.chars() {
        match flag {
            'i' | 'u' => {}
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            _ => return None,
        }
    }
    builder.build().ok()
}

fn split_regex_literal(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let flags = &rest[end + 1..];
    if flags.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((&rest[..end], flags))
    } else {
        None
    }
}

/// Tests a request header (missing headers read as the empty string).
#[derive(Debug)]
pub struct HeaderCheck {
    header: &'static str,
    op: TextOp,
}

impl HeaderCheck {
    pub fn new(header: &'static str, operator: &str, value: &str) -> Option<Self> {
        Some(Self {
            header,
            op: TextOp::parse(operator, value)?,
        })
    }
}

impl ConditionCheck for HeaderCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        self.op.test(ctx.header_or_empty(self.header))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoginStatusCheck {
    logged_in: bool,
}

impl LoginStatusCheck {
    pub fn new(value: &str) -> Option<Self> {
        match value {
            "logged_in" => Some(Self { logged_in: true }),
            "logged_out" => Some(Self { logged_in: false }),
            _ => None,
        }
    }
}

impl ConditionCheck for LoginStatusCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        ctx.principal.is_some() == self.logged_in
    }
}

/// `not_equals` negates; every other operator tests membership.
#[derive(Debug, Clone)]
pub struct RoleCheck {
    role: String,
    negate: bool,
}

impl ConditionCheck for RoleCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        let has_role = ctx
            .principal
            .as_ref()
            .is_some_and(|p| p.has_role(&self.role));
        has_role != self.negate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

const TABLET_KEYWORDS: &[&str] = &["ipad", "tablet", "kindle", "silk", "playbook"];
const MOBILE_KEYWORDS: &[&str] = &[
    "mobile",
    "android",
    "iphone",
    "ipod",
    "phone",
    "blackberry",
    "opera mini",
    "opera mobi",
];

impl DeviceClass {
    /// Classify a user agent. Tablet keywords win over mobile keywords.
    pub fn detect(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if TABLET_KEYWORDS.iter().any(|k| ua.contains(k)) {
            DeviceClass::Tablet
        } else if MOBILE_KEYWORDS.iter().any(|k| ua.contains(k)) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceCheck {
    expected: DeviceClass,
}

impl DeviceCheck {
    pub fn new(value: &str) -> Option<Self> {
        let expected = match value.to_ascii_lowercase().as_str() {
            "mobile" => DeviceClass::Mobile,
            "tablet" => DeviceClass::Tablet,
            "desktop" => DeviceClass::Desktop,
            _ => return None,
        };
        Some(Self { expected })
    }
}

impl ConditionCheck for DeviceCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        DeviceClass::detect(ctx.header_or_empty("user-agent")) == self.expected
    }
}

#[derive(Debug, Clone)]
pub enum LanguageCheck {
    Contains(String),
    Equals(String),
    StartsWith(String),
}

impl LanguageCheck {
    pub fn new(operator: &str, value: &str) -> Option<Self> {
        let value = value.to_lowercase();
        match operator {
            "contains" => Some(LanguageCheck::Contains(value)),
            "equals" => Some(LanguageCheck::Equals(value)),
            "starts_with" => Some(LanguageCheck::StartsWith(value)),
            _ => None,
        }
    }
}

impl ConditionCheck for LanguageCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        let header = ctx.header_or_empty("accept-language").to_lowercase();
        match self {
            LanguageCheck::Contains(v) => header.contains(v.as_str()),
            LanguageCheck::Equals(v) => header == *v,
            LanguageCheck::StartsWith(v) => header.starts_with(v.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Cookie,
    Query,
}

#[derive(Debug, Clone)]
pub enum KeyOp {
    Exists,
    NotExists,
    Equals(String),
    Contains(String),
}

/// Cookie and query-parameter checks. The value is `name` or `name=value`,
/// split on the first `=`.
#[derive(Debug, Clone)]
pub struct KeyValueCheck {
    source: KeySource,
    name: String,
    op: KeyOp,
}

impl KeyValueCheck {
    pub fn new(source: KeySource, operator: &str, raw: &str) -> Option<Self> {
        let (name, value) = raw.split_once('=').unwrap_or((raw, ""));
        let op = match operator {
            "exists" => KeyOp::Exists,
            "not_exists" => KeyOp::NotExists,
            "equals" => KeyOp::Equals(value.to_string()),
            "contains" if source == KeySource::Query => KeyOp::Contains(value.to_string()),
            _ => return None,
        };
        Some(Self {
            source,
            name: name.trim().to_string(),
            op,
        })
    }
}

impl ConditionCheck for KeyValueCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        let map = match self.source {
            KeySource::Cookie => &ctx.cookies,
            KeySource::Query => &ctx.query,
        };
        let actual = map.get(&self.name);
        match &self.op {
            KeyOp::Exists => actual.is_some(),
            KeyOp::NotExists => actual.is_none(),
            KeyOp::Equals(expected) => actual.is_some_and(|v| v == expected),
            KeyOp::Contains(needle) => actual.is_some_and(|v| v.contains(needle.as_str())),
        }
    }
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    mask: u32,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/len`. Prefix lengths above 32 are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let (addr, prefix) = value.trim().split_once('/')?;
        let addr: Ipv4Addr = addr.trim().parse().ok()?;
        let prefix: u32 = prefix.trim().parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Some(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => u32::from(v4) & self.mask == self.network,
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| u32::from(v4) & self.mask == self.network),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IpCheck {
    Equals(String),
    /// `None` for a malformed range, which never matches.
    InRange(Option<Ipv4Cidr>),
}

impl IpCheck {
    pub fn new(operator: &str, value: &str) -> Result<Self, String> {
        match operator {
            "equals" => Ok(IpCheck::Equals(value.to_string())),
            // Without a prefix length the range degrades to an exact comparison.
            "in_range" if !value.contains('/') => Ok(IpCheck::Equals(value.to_string())),
            "in_range" => Ok(IpCheck::InRange(Ipv4Cidr::parse(value))),
            other => Err(format!("operator '{}' is not supported for 'ip_range'", other)),
        }
    }
}

impl ConditionCheck for IpCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        let Some(ip) = ctx.client_ip else {
            return false;
        };
        match self {
            IpCheck::Equals(expected) => ip.to_string() == *expected,
            IpCheck::InRange(Some(cidr)) => cidr.contains(ip),
            IpCheck::InRange(None) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServerNameCheck {
    Equals(String),
    NotEquals(String),
    Contains(String),
}

impl ServerNameCheck {
    pub fn new(operator: &str, value: &str) -> Option<Self> {
        let value = value.to_ascii_lowercase();
        match operator {
            "equals" => Some(ServerNameCheck::Equals(value)),
            "not_equals" => Some(ServerNameCheck::NotEquals(value)),
            "contains" => Some(ServerNameCheck::Contains(value)),
            _ => None,
        }
    }
}

impl ConditionCheck for ServerNameCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        match self {
            ServerNameCheck::Equals(v) => ctx.host == *v,
            ServerNameCheck::NotEquals(v) => ctx.host != *v,
            ServerNameCheck::Contains(v) => ctx.host.contains(v.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodCheck {
    method: String,
}

impl ConditionCheck for MethodCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        ctx.method.eq_ignore_ascii_case(&self.method)
    }
}

/// Inclusive minute-of-day window. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRangeCheck {
    start: u32,
    end: u32,
}

impl TimeRangeCheck {
    pub fn parse(value: &str) -> Option<Self> {
        let (start, end) = value.split_once('-')?;
        Some(Self {
            start: parse_minutes(start)?,
            end: parse_minutes(end)?,
        })
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.start <= self.end {
            minute_of_day >= self.start && minute_of_day <= self.end
        } else {
            minute_of_day >= self.start || minute_of_day <= self.end
        }
    }
}

fn parse_minutes(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.trim().split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

impl ConditionCheck for TimeRangeCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        self.contains(ctx.now.hour() * 60 + ctx.now.minute())
    }
}

/// 0 = Sunday .. 6 = Saturday. Every operator except `not_equals` means equals.
#[derive(Debug, Clone, Copy)]
pub struct DayOfWeekCheck {
    day: Option<u32>,
    negate: bool,
}

impl DayOfWeekCheck {
    pub fn new(operator: &str, value: &str) -> Self {
        Self {
            day: value.trim().parse().ok().filter(|d| *d <= 6),
            negate: operator == "not_equals",
        }
    }
}

impl ConditionCheck for DayOfWeekCheck {
    fn evaluate(&self, ctx: &RequestContext) -> bool {
        let today = ctx.now.weekday().num_days_from_sunday();
        (self.day == Some(today)) != self.negate
    }
}
