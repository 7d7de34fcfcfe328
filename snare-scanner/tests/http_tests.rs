// HTTP session tests against a local mock server

use snare_core::{Form, Method, Request};
use snare_scanner::{CrawlConfig, Crawler, Driver, Extractor, HttpSession};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path, query_param},
};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_bytes(format!("<html><body>{}</body></html>", body).into_bytes())
}

async fn serve(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(html(body))
        .mount(server)
        .await;
}

// ============================================================================
// Extraction Tests
// ============================================================================

#[tokio::test]
async fn test_extracts_links_forms_iframes_and_events() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/",
        r##"
        <a href="/page1">one</a>
        <a href="/page1#frag">dup</a>
        <a href="mailto:x@example.com">mail</a>
        <a href="javascript:void(0)">nothing</a>
        <a href="javascript:show('menu')">menu</a>
        <form action="/search" method="POST">
            <input type="text" name="q">
            <input type="hidden" name="csrf" value="abc">
            <select name="sort"><option value="asc">A</option><option>desc</option></select>
            <textarea name="comment">hi</textarea>
            <input type="submit" name="go" value="Go">
        </form>
        <iframe id="ad" src="/frame"></iframe>
        <button id="btn" onclick="doThing()">click</button>
        "##,
    )
    .await;

    let mut session = HttpSession::new().unwrap();
    session.navigate(&server.uri()).await.unwrap();
    let facts = session.extract().await.unwrap();

    let page1 = Request::get(format!("{}/page1", server.uri()));
    assert_eq!(facts.urls.iter().filter(|r| **r == page1).count(), 1);
    assert!(facts.urls.iter().any(|r| r.method == Method::Javascript && r.url == "javascript:show('menu')"));
    assert!(!facts.urls.iter().any(|r| r.url.starts_with("mailto:")));
    assert!(!facts.urls.iter().any(|r| r.url.contains("void(0)")));

    assert_eq!(facts.forms.len(), 1);
    let form = &facts.forms[0];
    assert_eq!(form.action, format!("{}/search", server.uri()));
    assert_eq!(form.method, "post");
    let types: Vec<Option<&str>> = form.keys().map(|k| k.itype()).collect();
    assert!(types.contains(&Some("hidden")));
    assert!(types.contains(&Some("select")));
    assert!(types.contains(&Some("textarea")));
    assert!(types.contains(&Some("submit")));

    assert_eq!(facts.iframes.len(), 1);
    assert_eq!(facts.iframes[0].id.as_deref(), Some("ad"));
    assert_eq!(facts.iframes[0].src, Some(format!("{}/frame", server.uri())));

    assert_eq!(facts.events.len(), 1);
    let event = &facts.events[0];
    assert_eq!(event.event, "click");
    assert_eq!(event.element_id, "btn");
    assert_eq!(event.tag, "button");
    assert_eq!(event.function_id, "doThing()");
    assert_eq!(event.address, "/html[1]/body[1]/button[1]");
}

#[tokio::test]
async fn test_extracts_loose_inputs_as_ui_form() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/",
        r#"<input type="text" id="name"><input type="checkbox"><button>Save</button>"#,
    )
    .await;

    let mut session = HttpSession::new().unwrap();
    session.navigate(&server.uri()).await.unwrap();
    let facts = session.extract().await.unwrap();

    assert_eq!(facts.ui_forms.len(), 1);
    assert_eq!(facts.ui_forms[0].sources.len(), 1);
    assert_eq!(facts.ui_forms[0].submit, "/html[1]/body[1]/button[1]");
}

#[tokio::test]
async fn test_extract_before_navigation_is_empty() {
    let mut session = HttpSession::new().unwrap();
    assert!(session.extract().await.unwrap().is_empty());
    assert_eq!(session.current_url(), "about:blank");
}

// ============================================================================
// Submission Tests
// ============================================================================

#[tokio::test]
async fn test_get_form_submits_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "jAEkPot"))
        .respond_with(html("results"))
        .expect(1)
        .mount(&server)
        .await;

    let mut form = Form::new(format!("{}/search", server.uri()), "get");
    form.add_input(Some("text"), Some("q"), None, false);
    form.fill_defaults();

    let mut session = HttpSession::new().unwrap();
    session.fill_and_submit(&form).await.unwrap();
    assert_eq!(session.status(), 200);
    assert!(session.body().contains("results"));
}

#[tokio::test]
async fn test_post_form_submits_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("user=jAEkPot"))
        .respond_with(html("welcome"))
        .expect(1)
        .mount(&server)
        .await;

    let mut form = Form::new(format!("{}/login", server.uri()), "post");
    form.add_input(Some("text"), Some("user"), None, false);
    form.add_input(Some("password"), Some("pass"), None, false);
    form.fill_defaults();

    let mut session = HttpSession::new().unwrap();
    session.fill_and_submit(&form).await.unwrap();
    assert!(session.body().contains("welcome"));
}

#[tokio::test]
async fn test_script_actions_are_unsupported() {
    let mut session = HttpSession::new().unwrap();
    assert!(session.run_script("alert(1)").await.is_err());
    assert!(session.navigate("javascript:alert(1)").await.is_err());
    assert!(!session.dismiss_alert().await);
    assert!(!session.need_to_wait().await.unwrap());
}

// ============================================================================
// Reflection Tests
// ============================================================================

#[tokio::test]
async fn test_observes_markers_by_location() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/",
        r#"<script>xss(4242)</script><a href="" jaekpot-attribute="777">x</a><p>tracked abcdefgh here</p><p>x42420</p>"#,
    )
    .await;

    let mut session = HttpSession::new().unwrap();
    session.navigate(&server.uri()).await.unwrap();
    let markers = vec![
        "4242".to_string(),
        "777".to_string(),
        "abcdefgh".to_string(),
        "999".to_string(),
    ];
    let found = session.observe_markers(&markers).await;

    let at = |m: &str| -> Vec<String> {
        found
            .iter()
            .filter(|o| o.marker == m)
            .map(|o| o.location.clone())
            .collect()
    };
    assert_eq!(at("4242"), vec!["script"]);
    assert_eq!(at("777"), vec!["attribute:jaekpot-attribute"]);
    assert_eq!(at("abcdefgh"), vec!["text"]);
    assert!(at("999").is_empty());
}

// ============================================================================
// End-to-end Tests
// ============================================================================

#[tokio::test]
async fn test_crawl_over_http() {
    let server = MockServer::start().await;
    serve(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#).await;
    serve(&server, "/a", r#"<form action="/s"><input name="q"></form>"#).await;
    serve(&server, "/b", "leaf").await;
    serve(&server, "/s", "searched").await;

    let mut config = CrawlConfig::new(format!("{}/", server.uri()));
    config.crawler_only = true;
    config.settle_delay_ms = 0;
    let mut crawler = Crawler::new(HttpSession::new().unwrap(), config).unwrap();

    let summary = crawler.crawl().await.unwrap();

    assert!(summary.finished());
    let graph = crawler.graph();
    assert!(graph.contains(&Request::get(format!("{}/a", server.uri()))));
    assert!(graph.contains(&Request::get(format!("{}/b", server.uri()))));
    assert!(graph.contains(&Request::new(format!("{}/s", server.uri()), Method::Form)));
    assert!(crawler.tracker().tracker_count() >= 1);
}

#[tokio::test]
async fn test_attack_finds_reflected_query_parameter() {
    let server = MockServer::start().await;
    serve(&server, "/", r#"<a href="/echo?name=bob">echo</a>"#).await;
    // Echoes whatever was sent, unescaped
    Mock::given(method("GET"))
        .and(path("/echo"))
        .respond_with(move |req: &wiremock::Request| {
            let name = req
                .url
                .query_pairs()
                .find(|(k, _)| k == "name")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            html(&format!("Hello {}", name))
        })
        .mount(&server)
        .await;

    let mut config = CrawlConfig::new(format!("{}/", server.uri()));
    config.settle_delay_ms = 0;
    let mut crawler = Crawler::new(HttpSession::new().unwrap(), config).unwrap();

    let summary = crawler.run().await.unwrap();

    assert_eq!(summary.payloads_armed, 7);
    let script_hits = crawler
        .tracker()
        .payloads()
        .filter(|(_, r)| r.reflected.iter().any(|(_, loc)| loc == "script"))
        .count();
    assert!(script_hits >= 1);
}
