//! robots.txt gate.
//!
//! Matching follows Google's robots.txt rules through the `robotstxt`
//! crate: groups naming the agent's product token win over `*`, the longest
//! matching `Allow`/`Disallow` pattern decides and `Allow` wins ties.

use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::time::Duration;
use tracing::debug;
use url::Url;

use mr_core::Result;

const MAX_ROBOTS_BYTES: usize = 512 * 1024;
pub const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);

/// Evaluate a robots.txt body for `url` (absolute, path and query are
/// matched).
pub fn robots_allows(content: &str, user_agent: &str, url: &str) -> bool {
    let mut matcher = DefaultMatcher::default();
    matcher.one_agent_allowed_by_robots(content, &product_token(user_agent), url)
}

/// `MandelaReport/0.1 (+mailto:...)` → `MandelaReport`
fn product_token(user_agent: &str) -> String {
    user_agent
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '-' || *c == '_')
        .collect()
}

/// Decides whether a URL may be fetched. Any failure to obtain robots.txt
/// counts as permission.
#[derive(Clone)]
pub struct RobotsGate {
    client: Client,
    user_agent: String,
}

impl RobotsGate {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout.min(ROBOTS_TIMEOUT))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn robots_url(url: &Url) -> Option<Url> {
        let mut robots = url.clone();
        robots.set_path("/robots.txt");
        robots.set_query(None);
        robots.set_fragment(None);
        if robots.host_str().is_none() {
            return None;
        }
        Some(robots)
    }

    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(robots_url) = Self::robots_url(&parsed) else {
            return true;
        };

        let Some(content) = self.fetch_robots(&robots_url).await else {
            debug!("🤖 No usable robots.txt at {}, allowing", robots_url);
            return true;
        };

        let allowed = robots_allows(&content, &self.user_agent, parsed.as_str());
        debug!("🤖 robots.txt {} {}", if allowed { "allows" } else { "disallows" }, url);
        allowed
    }

    /// Reads at most `MAX_ROBOTS_BYTES`; the rest of the body is never
    /// pulled off the wire.
    async fn fetch_robots(&self, robots_url: &Url) -> Option<String> {
        let mut response = self.client.get(robots_url.clone()).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.ok()? {
            let room = MAX_ROBOTS_BYTES - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Some(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    const UA: &str = "MandelaReport/0.1 (+mailto:you@example.com)";

    fn allowed(content: &str, user_agent: &str, path: &str) -> bool {
        robots_allows(content, user_agent, &format!("https://example.com{}", path))
    }

    #[test]
    fn test_product_token() {
        assert_eq!(product_token(UA), "MandelaReport");
        assert_eq!(product_token("Other_Bot-2 x"), "Other_Bot-");
    }

    #[test]
    fn test_disallow_for_all_agents() {
        let robots = "User-agent: *\nDisallow: /private/\n";
        assert!(!allowed(robots, UA, "/private/page.html"));
        assert!(allowed(robots, UA, "/public/page.html"));
        assert!(allowed(robots, UA, "/private"));
    }

    #[test]
    fn test_specific_agent_group_wins() {
        let robots = "User-agent: *\nDisallow: /\n\nUser-agent: MandelaReport\nDisallow: /admin\n";
        assert!(allowed(robots, UA, "/news"));
        assert!(!allowed(robots, UA, "/admin/users"));
        assert!(!allowed(robots, "OtherBot/2.0", "/news"));
    }

    #[test]
    fn test_longest_rule_and_allow_ties() {
        let robots =
            "User-agent: *\nDisallow: /shop\nAllow: /shop/public\nDisallow: /page\nAllow: /page\n";
        assert!(!allowed(robots, UA, "/shop/cart"));
        assert!(allowed(robots, UA, "/shop/public/item"));
        assert!(allowed(robots, UA, "/page"));
    }

    #[test]
    fn test_wildcards_and_anchors() {
        let robots = "User-agent: *\nDisallow: /*.pdf$\nDisallow: /search*q=\n";
        assert!(!allowed(robots, UA, "/files/report.pdf"));
        assert!(allowed(robots, UA, "/files/report.pdf?download=1"));
        assert!(!allowed(robots, UA, "/search?lang=en&q=cats"));
        assert!(allowed(robots, UA, "/search?lang=en"));
    }

    #[test]
    fn test_grouped_agents_comments_and_empty_disallow() {
        let robots =
            "# comment\nUser-agent: a-bot\nUser-agent: mandelareport # us\nDisallow: /x\n\nUser-agent: *\nDisallow:\n";
        assert!(!allowed(robots, UA, "/x"));
        assert!(!allowed(robots, "a-bot", "/x"));
        assert!(allowed(robots, "a-bot", "/y"));
        assert!(allowed(robots, "Unknown", "/x"));
    }

    #[test]
    fn test_no_matching_group() {
        assert!(allowed("User-agent: googlebot\nDisallow: /\n", UA, "/anything"));
        assert!(allowed("", UA, "/"));
    }

    #[test]
    fn test_robots_url() {
        let url = Url::parse("https://example.com:8443/a/b?c=d#e").unwrap();
        assert_eq!(
            RobotsGate::robots_url(&url).unwrap().as_str(),
            "https://example.com:8443/robots.txt"
        );
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_gate_reads_robots() {
        let app = Router::new().route(
            "/robots.txt",
            get(|| async { "User-agent: *\nDisallow: /private/\n" }),
        );
        let base = serve(app).await;
        let gate = RobotsGate::new(UA, Duration::from_secs(5)).unwrap();

        assert!(!gate.is_allowed(&format!("{}/private/secret.html", base)).await);
        assert!(gate.is_allowed(&format!("{}/index.html", base)).await);
    }

    #[tokio::test]
    async fn test_gate_allows_on_fetch_error() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gate = RobotsGate::new(UA, Duration::from_secs(2)).unwrap();
        assert!(gate.is_allowed(&format!("http://{}/private/x", addr)).await);
    }

    #[tokio::test]
    async fn test_gate_allows_on_server_error() {
        let app = Router::new().route(
            "/robots.txt",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Disallow: /") }),
        );
        let base = serve(app).await;
        let gate = RobotsGate::new(UA, Duration::from_secs(5)).unwrap();
        assert!(gate.is_allowed(&format!("{}/private/x", base)).await);
    }

    #[tokio::test]
    async fn test_oversized_robots_is_cut_at_cap() {
        let mut body = String::from("User-agent: *\nDisallow: /private/\n");
        while body.len() < MAX_ROBOTS_BYTES + 64 * 1024 {
            body.push_str("# filler line for an oversized robots.txt\n");
        }
        body.push_str("Disallow: /late/\n");
        let app = Router::new().route("/robots.txt", get(move || async move { body }));
        let base = serve(app).await;
        let gate = RobotsGate::new(UA, Duration::from_secs(5)).unwrap();

        let robots_url = Url::parse(&format!("{}/robots.txt", base)).unwrap();
        let fetched = gate.fetch_robots(&robots_url).await.unwrap();
        assert_eq!(fetched.len(), MAX_ROBOTS_BYTES);

        assert!(!gate.is_allowed(&format!("{}/private/x", base)).await);
        assert!(gate.is_allowed(&format!("{}/late/x", base)).await);
    }
}
