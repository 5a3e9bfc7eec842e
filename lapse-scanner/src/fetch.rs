use crate::error::{Result, ScanError};
use crate::result::FetchedPage;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use texting_robots::Robot;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

const USER_AGENT: &str = "Lapse/0.1 (https://github.com/trapdoorsec/lapse)";
const ROBOTS_AGENT_TOKEN: &str = "lapse";

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Minimum gap between two requests to the same host.
    pub per_host_delay: Duration,
    pub obey_robots: bool,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            per_host_delay: Duration::from_secs(1),
            obey_robots: true,
            max_redirects: 5,
        }
    }
}

/// Polite page fetcher: one request per host per delay, robots.txt honored.
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
    throttle: HostThrottle,
    robots: StdMutex<HashMap<String, Arc<OnceCell<RobotsPolicy>>>>,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            throttle: HostThrottle::new(config.per_host_delay),
            config,
            robots: StdMutex::new(HashMap::new()),
        })
    }

    /// Whether robots.txt lets us fetch `url`. Each origin's robots.txt is
    /// requested once; other origins never wait on it.
    async fn robots_allow(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let cell = self
            .robots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(origin.clone())
            .or_default()
            .clone();

        cell.get_or_init(|| self.load_robots(url, &origin))
            .await
            .allows(&path_and_query(url))
    }

    async fn load_robots(&self, url: &Url, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{}/robots.txt", origin);
        if let Some(host) = url.host_str() {
            self.throttle.wait_turn(host).await;
        }

        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(body) => {
                    info!("Loaded robots.txt for {}", origin);
                    RobotsPolicy::parse(&body, ROBOTS_AGENT_TOKEN)
                }
                Err(e) => {
                    debug!("Unreadable robots.txt at {}: {}", robots_url, e);
                    RobotsPolicy::default()
                }
            },
            Ok(response) => {
                debug!("No robots.txt at {} ({})", robots_url, response.status());
                RobotsPolicy::default()
            }
            Err(e) => {
                debug!("Failed to fetch {}: {}", robots_url, e);
                RobotsPolicy::default()
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed =
            Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{}: no host", url)))?
            .to_string();

        if self.config.obey_robots && !self.robots_allow(&parsed).await {
            return Err(ScanError::RobotsDisallowed(url.to_string()));
        }

        self.throttle.wait_turn(&host).await;

        debug!("Fetching {}", url);
        let response = self.client.get(parsed).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut page = FetchedPage {
            status,
            final_url,
            content_type,
            body: String::new(),
        };
        // Only HTML is ever parsed, skip downloading anything else
        if page.is_html() {
            page.body = response.text().await?;
        }

        Ok(page)
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Hands out request slots per host, `delay` apart.
struct HostThrottle {
    delay: Duration,
    next_slot: StdMutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: StdMutex::new(HashMap::new()),
        }
    }

    /// Books the next free slot for `host` and returns how long to wait for it.
    fn reserve(&self, host: &str) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }

        let mut slots = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let slot = slots
            .get(host)
            .copied()
            .filter(|next| *next > now)
            .unwrap_or(now);
        slots.insert(host.to_string(), slot + self.delay);

        slot.saturating_duration_since(now)
    }

    async fn wait_turn(&self, host: &str) {
        let wait = self.reserve(host);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// robots.txt rules for one origin. A missing or unparseable file allows
/// everything.
#[derive(Default)]
pub struct RobotsPolicy {
    robot: Option<Robot>,
}

impl RobotsPolicy {
    pub fn parse(body: &[u8], agent_token: &str) -> Self {
        match Robot::new(agent_token, body) {
            Ok(robot) => Self { robot: Some(robot) },
            Err(e) => {
                debug!("Ignoring unparseable robots.txt: {}", e);
                Self::default()
            }
        }
    }

    pub fn allows(&self, path: &str) -> bool {
        self.robot
            .as_ref()
            .is_none_or(|robot| robot.allowed(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn test_config() -> FetchConfig {
        FetchConfig {
            per_host_delay: Duration::ZERO,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_robots_parse_wildcard_group() {
        let body = b"User-agent: *\nDisallow: /private\nAllow: /private/open\n\nUser-agent: otherbot\nDisallow: /\n";
        let rules = RobotsPolicy::parse(body, "lapse");

        assert!(rules.allows("/"));
        assert!(rules.allows("/blog/post"));
        assert!(!rules.allows("/private"));
        assert!(!rules.allows("/private/secret"));
        assert!(rules.allows("/private/open/doc"));
    }

    #[test]
    fn test_robots_parse_named_group_and_comments() {
        let body = b"# comment line\nUser-agent: lapse\nDisallow: /admin # trailing comment\n";
        let rules = RobotsPolicy::parse(body, "lapse");

        assert!(!rules.allows("/admin/users"));
        assert!(rules.allows("/about"));
    }

    #[test]
    fn test_robots_path_wildcards() {
        let body = b"User-agent: *\nDisallow: /*?sessionid=\nDisallow: /*.pdf$\n";
        let rules = RobotsPolicy::parse(body, "lapse");

        assert!(!rules.allows("/a?sessionid=1"));
        assert!(!rules.allows("/docs/doc.pdf"));
        assert!(rules.allows("/doc.pdf.html"));
        assert!(rules.allows("/a?page=2"));
    }

    #[test]
    fn test_robots_empty_disallow_allows_all() {
        let rules = RobotsPolicy::parse(b"User-agent: *\nDisallow:\n", "lapse");
        assert!(rules.allows("/anything"));
        assert!(RobotsPolicy::default().allows("/anything"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_requests_per_host() {
        let throttle = HostThrottle::new(Duration::from_secs(1));

        assert_eq!(throttle.reserve("a.example"), Duration::ZERO);
        assert_eq!(throttle.reserve("a.example"), Duration::from_secs(1));
        assert_eq!(throttle.reserve("a.example"), Duration::from_secs(2));
        // Other hosts have their own schedule
        assert_eq!(throttle.reserve("b.example"), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(throttle.reserve("a.example"), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fetch_returns_status_type_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>hi</body></html>"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(test_config()).unwrap();
        let page = fetcher
            .fetch(&format!("{}/page", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert!(page.is_html());
        assert_eq!(page.body, "<html><body>hi</body></html>");
        assert_eq!(page.final_url, format!("{}/page", mock_server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_reports_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(test_config()).unwrap();
        let page = fetcher
            .fetch(&format!("{}/missing", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(page.status, 404);
        assert!(!page.is_success());
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects_to_final_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/new", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>moved</p>"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(test_config()).unwrap();
        let page = fetcher
            .fetch(&format!("{}/old", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.final_url, format!("{}/new", mock_server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_honors_robots_txt() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(test_config()).unwrap();

        let blocked = fetcher
            .fetch(&format!("{}/private/report", mock_server.uri()))
            .await;
        assert!(matches!(blocked, Err(ScanError::RobotsDisallowed(_))));

        let allowed = fetcher
            .fetch(&format!("{}/public", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(allowed.status, 200);
    }

    #[tokio::test]
    async fn test_slow_robots_txt_does_not_block_other_origins() {
        let slow_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow:\n")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&slow_server)
            .await;
        let fast_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&fast_server)
            .await;

        let fetcher = Arc::new(HttpFetcher::new(test_config()).unwrap());
        let slow_fetch = {
            let fetcher = fetcher.clone();
            let url = format!("{}/page", slow_server.uri());
            tokio::spawn(async move { fetcher.fetch(&url).await })
        };
        // Let the slow robots.txt request get under way first
        tokio::time::sleep(Duration::from_millis(200)).await;

        let page = tokio::time::timeout(
            Duration::from_secs(1),
            fetcher.fetch(&format!("{}/page", fast_server.uri())),
        )
        .await
        .expect("fetch waited on another origin's robots.txt")
        .unwrap();
        assert_eq!(page.status, 200);

        slow_fetch.abort();
    }

    #[tokio::test]
    async fn test_fetch_honors_robots_wildcards() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /*.pdf$\n"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(test_config()).unwrap();
        let blocked = fetcher
            .fetch(&format!("{}/files/report.pdf", mock_server.uri()))
            .await;
        assert!(matches!(blocked, Err(ScanError::RobotsDisallowed(_))));

        let again = fetcher
            .fetch(&format!("{}/other.pdf", mock_server.uri()))
            .await;
        assert!(matches!(again, Err(ScanError::RobotsDisallowed(_))));
    }

    #[tokio::test]
    async fn test_fetch_ignores_robots_when_disabled() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
            .expect(0)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(FetchConfig {
            obey_robots: false,
            ..test_config()
        })
        .unwrap();

        let page = fetcher
            .fetch(&format!("{}/private", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
    }

    #[tokio::test]
    async fn test_fetch_network_error_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(FetchConfig {
            obey_robots: false,
            ..test_config()
        })
        .unwrap();

        let result = fetcher.fetch(&format!("http://{}/", address)).await;
        assert!(matches!(result, Err(ScanError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let fetcher = HttpFetcher::new(test_config()).unwrap();
        let result = fetcher.fetch("definitely not a url").await;
        assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
    }
}
