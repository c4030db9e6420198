//! Integration tests for pagination over the HTTP browser backend
//!
//! Listing indexes are served by wiremock; pages that are not mounted answer
//! 404 and count as empty.

use adcrawl::browser::{BrowserSession, HttpLauncher};
use adcrawl::config::BrowserConfig;
use adcrawl::pagination::{paginate, ContentPredicate, PageUrl, PaginationOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn index_page(ads: &[&str]) -> String {
    let links: String = ads
        .iter()
        .map(|href| format!(r#"<li><a class="ad" href="{}">ad</a></li>"#, href))
        .collect();
    format!("<html><body><ul>{}</ul></body></html>", links)
}

async fn session() -> BrowserSession {
    BrowserSession::open(&HttpLauncher::new(BrowserConfig::default()))
        .await
        .expect("HTTP browser should launch")
}

async fn mount_page(server: &MockServer, route: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_stops_after_consecutive_empty_pages() {
    let server = MockServer::start().await;
    mount_page(&server, "/ads/page/1", index_page(&["/ad/1", "/ad/2"])).await;
    mount_page(&server, "/ads/page/2", index_page(&["/ad/3"])).await;
    mount_page(&server, "/ads/page/3", index_page(&["/ad/4", "/ad/5"])).await;

    let session = session().await;
    let options = PaginationOptions {
        page_url: PageUrl::Template(format!("{}/ads/page/{{page}}", server.uri())),
        max_pages: 100,
        max_empty_pages: 2,
        navigation_timeout: Duration::from_secs(5),
        ..PaginationOptions::default()
    };
    let predicate = ContentPredicate::selector("a.ad").unwrap();
    let mut pages = paginate(session.context(), server.uri(), predicate, options);

    let mut visits = Vec::new();
    while let Some(visit) = pages.next().await {
        visits.push(visit.unwrap());
    }

    let numbers: Vec<u32> = visits.iter().map(|v| v.page_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    let counts: Vec<usize> = visits.iter().map(|v| v.item_count).collect();
    assert_eq!(counts, vec![2, 1, 2, 0, 0]);

    assert!(visits[..3].iter().all(|v| v.has_content && v.error.is_none()));
    assert!(visits[3..].iter().all(|v| !v.has_content && v.error.is_some()));

    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(session.context().open_pages(), 0);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_query_paging_runs_to_max_pages() {
    let server = MockServer::start().await;
    for page in 2..=3 {
        Mock::given(method("GET"))
            .and(path("/cars"))
            .and(query_param("page", page.to_string()))
            .and(query_param("sort", "new"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(index_page(&[&format!("/ad/{}", page)])),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/cars"))
        .and(query_param("sort", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page(&["/ad/1"])))
        .with_priority(10)
        .mount(&server)
        .await;

    let session = session().await;
    let options = PaginationOptions {
        page_url: PageUrl::Query {
            param: "page".to_string(),
            separator: "?".to_string(),
            extra_params: vec![("sort".to_string(), "new".to_string())],
        },
        max_pages: 3,
        ..PaginationOptions::default()
    };
    let predicate = ContentPredicate::selector("a.ad").unwrap();
    let base = format!("{}/cars", server.uri());
    let mut pages = paginate(session.context(), base.clone(), predicate, options);

    let mut urls = Vec::new();
    while let Some(visit) = pages.next().await {
        let visit = visit.unwrap();
        assert!(visit.has_content);
        urls.push(visit.url);
    }

    assert_eq!(
        urls,
        vec![
            format!("{}?sort=new", base),
            format!("{}?sort=new&page=2", base),
            format!("{}?sort=new&page=3", base),
        ]
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_early_close_and_cancellation_release_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page(&["/ad/1"])))
        .mount(&server)
        .await;

    let session = session().await;
    let base = format!("{}/ads", server.uri());

    let mut pages = paginate(
        session.context(),
        base.clone(),
        ContentPredicate::selector("a.ad").unwrap(),
        PaginationOptions::default(),
    );
    assert!(pages.next().await.unwrap().unwrap().has_content);
    assert_eq!(session.context().open_pages(), 1);
    pages.close().await;
    assert_eq!(session.context().open_pages(), 0);

    let cancel = CancellationToken::new();
    let options = PaginationOptions {
        cancel: Some(cancel.clone()),
        ..PaginationOptions::default()
    };
    let mut pages = paginate(
        session.context(),
        base,
        ContentPredicate::selector("a.ad").unwrap(),
        options,
    );
    assert!(pages.next().await.is_some());
    cancel.cancel();
    assert!(pages.next().await.is_none());
    assert_eq!(session.context().open_pages(), 0);

    session.close().await.unwrap();
}
