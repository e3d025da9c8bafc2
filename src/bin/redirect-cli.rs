use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "redirect-cli")]
#[command(about = "Management CLI for the redirect engine admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "REDIRECT_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "REDIRECT_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check engine status
    Status,
    /// List rules
    Rules {
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        regex: Option<bool>,
        #[arg(long)]
        group: Option<String>,
        /// Substring of source or target
        #[arg(long)]
        search: Option<String>,
    },
    /// Show one rule
    Show { id: u64 },
    /// Create a redirect rule
    Add {
        source: String,
        target: String,
        #[arg(long, default_value_t = 301)]
        status: u16,
        #[arg(long)]
        regex: bool,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Create a 410 rule
    Gone { source: String },
    /// Delete a rule
    Delete { id: u64 },
    /// List redirect chains (or only loops)
    Chains {
        #[arg(long)]
        loops: bool,
    },
    /// Follow exact rules from a URL
    Trace { url: String },
    /// Collapse every chain to its final target
    FixChains,
    /// Dry-run a request against the active rules
    Test {
        url: String,
        /// Extra header as name:value
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Cookie as name=value
        #[arg(long = "cookie")]
        cookies: Vec<String>,
        #[arg(long)]
        client_ip: Option<String>,
    },
    /// Rules sharing a source
    Duplicates,
    /// Export rules as web server configuration (htaccess | nginx)
    Export { format: String },
    /// Rule counts and top rules by hits
    Stats {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Hits per day, for all rules or one
    Daily {
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long)]
        rule: Option<u64>,
    },
    /// Requests no rule answered
    NotFound {
        #[command(subcommand)]
        command: NotFoundCommands,
    },
    /// Rule aging
    Aging {
        #[command(subcommand)]
        command: AgingCommands,
    },
    /// Drop the compiled rule snapshot
    InvalidateCache,
    /// Record that content moved from one URL to another
    Moved { old_url: String, new_url: String },
    /// Record that content at a URL was deleted
    Deleted { url: String },
}

#[derive(Subcommand)]
enum NotFoundCommands {
    /// List logged 404s
    List {
        /// all | resolved | unresolved
        #[arg(long, default_value = "unresolved")]
        status: String,
        /// Substring of the path or referer
        #[arg(long)]
        search: Option<String>,
        /// id | path | count | created_at | last_seen
        #[arg(long, default_value = "last_seen")]
        sort: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 25)]
        per_page: usize,
    },
    /// Show one entry
    Show { id: u64 },
    /// Mark an entry resolved
    Resolve {
        id: u64,
        /// Rule that now answers the path
        #[arg(long)]
        redirect_id: Option<u64>,
    },
    /// Delete an entry
    Delete { id: u64 },
}

#[derive(Subcommand)]
enum AgingCommands {
    /// Rules the policy would retire
    Candidates,
    /// Retire candidates now
    Apply {
        /// deactivate | delete | convert_to_410 (defaults to the configured action)
        #[arg(long)]
        action: Option<String>,
    },
    /// Last cleanup report
    Last,
}

fn split_pair(raw: &str, sep: char) -> Result<(String, String), String> {
    raw.split_once(sep)
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected name{}value, got '{}'", sep, raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body): (Method, String, Option<Value>) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".into(), None),
        Commands::Rules { active, regex, group, search } => {
            let mut params = Vec::new();
            if let Some(a) = active {
                params.push(format!("active={}", a));
            }
            if let Some(r) = regex {
                params.push(format!("regex={}", r));
            }
            let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(group.iter().map(|g| ("group", g.as_str())))
                .extend_pairs(search.iter().map(|q| ("q", q.as_str())))
                .finish();
            if !encoded.is_empty() {
                params.push(encoded);
            }
            let query = if params.is_empty() {
                String::new()
            } else {
                format!("?{}", params.join("&"))
            };
            (Method::GET, format!("/admin/rules{}", query), None)
        }
        Commands::Show { id } => (Method::GET, format!("/admin/rules/{}", id), None),
        Commands::Add { source, target, status, regex, group, note } => (
            Method::POST,
            "/admin/rules".into(),
            Some(json!({
                "source": source,
                "target": target,
                "status": status,
                "is_regex": regex,
                "group": group,
                "provenance": "cli",
                "note": note,
            })),
        ),
        Commands::Gone { source } => (
            Method::POST,
            "/admin/rules".into(),
            Some(json!({ "source": source, "status": 410, "provenance": "cli" })),
        ),
        Commands::Delete { id } => (Method::DELETE, format!("/admin/rules/{}", id), None),
        Commands::Chains { loops } => {
            let path = if loops { "/admin/chains/loops" } else { "/admin/chains" };
            (Method::GET, path.into(), None)
        }
        Commands::Trace { url } => {
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("url", &url)
                .finish();
            (Method::GET, format!("/admin/chains/trace?{}", query), None)
        }
        Commands::FixChains => (Method::POST, "/admin/chains/fix".into(), None),
        Commands::Test { url, headers: raw_headers, cookies, client_ip } => {
            let mut header_map = Map::new();
            for raw in &raw_headers {
                let (k, v) = split_pair(raw, ':')?;
                header_map.insert(k, Value::String(v));
            }
            let mut cookie_map = Map::new();
            for raw in &cookies {
                let (k, v) = split_pair(raw, '=')?;
                cookie_map.insert(k, Value::String(v));
            }
            (
                Method::POST,
                "/admin/test".into(),
                Some(json!({
                    "url": url,
                    "headers": header_map,
                    "cookies": cookie_map,
                    "client_ip": client_ip,
                })),
            )
        }
        Commands::Duplicates => (Method::GET, "/admin/duplicates".into(), None),
        Commands::Export { format } => (Method::GET, format!("/admin/export/{}", format), None),
        Commands::Stats { limit } => (Method::GET, format!("/admin/stats?limit={}", limit), None),
        Commands::Daily { days, rule } => {
            let mut path = format!("/admin/stats/daily?days={}", days);
            if let Some(rule) = rule {
                path.push_str(&format!("&rule={}", rule));
            }
            (Method::GET, path, None)
        }
        Commands::NotFound { command } => match command {
            NotFoundCommands::List { status, search, sort, page, per_page } => {
                let query: String = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("status", &status)
                    .append_pair("sort", &sort)
                    .append_pair("page", &page.to_string())
                    .append_pair("per_page", &per_page.to_string())
                    .extend_pairs(search.iter().map(|q| ("search", q.as_str())))
                    .finish();
                (Method::GET, format!("/admin/404s?{}", query), None)
            }
            NotFoundCommands::Show { id } => (Method::GET, format!("/admin/404s/{}", id), None),
            NotFoundCommands::Resolve { id, redirect_id } => (
                Method::POST,
                format!("/admin/404s/{}/resolve", id),
                Some(json!({ "redirect_id": redirect_id })),
            ),
            NotFoundCommands::Delete { id } => (Method::DELETE, format!("/admin/404s/{}", id), None),
        },
        Commands::Aging { command } => match command {
            AgingCommands::Candidates => (Method::GET, "/admin/aging/candidates".into(), None),
            AgingCommands::Apply { action } => (
                Method::POST,
                "/admin/aging/apply".into(),
                Some(json!({ "action": action })),
            ),
            AgingCommands::Last => (Method::GET, "/admin/aging/last".into(), None),
        },
        Commands::InvalidateCache => (Method::POST, "/admin/cache/invalidate".into(), None),
        Commands::Moved { old_url, new_url } => (
            Method::POST,
            "/admin/content/moved".into(),
            Some(json!({ "old_url": old_url, "new_url": new_url })),
        ),
        Commands::Deleted { url } => (
            Method::POST,
            "/admin/content/deleted".into(),
            Some(json!({ "url": url })),
        ),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("OK ({})", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        // Export output is plain text.
        Err(_) => print!("{}", text),
    }
    Ok(())
}
