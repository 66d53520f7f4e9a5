mod service_stub;

use std::sync::Arc;

use reviewdigest::app::runner::ScrapeRunner;
use reviewdigest::app::service::{ReviewService, TriggerOutcome};
use reviewdigest::app::status::StatusTracker;
use reviewdigest::collect::Collector;
use reviewdigest::config::{BrowserSettings, DistillSettings, LlmEngine, Secrets, StoreSettings};
use reviewdigest::distill::DistillationBackend;
use reviewdigest::formats::ScrapeState;
use reviewdigest::store::local_fs::LocalFsDocumentStore;
use reviewdigest::store::reviews::ReviewRepository;
use reviewdigest::testing::{ScriptedBrowser, ScriptedReview};
use service_stub::{ServiceStub, gemini_reply, openai_reply, qa_reply};

fn fast_browser() -> BrowserSettings {
    BrowserSettings {
        element_timeout_ms: 50,
        poll_interval_ms: 1,
        navigation_settle_ms: 0,
        scroll_stall_ms: 5,
        expand_settle_ms: 0,
        ..BrowserSettings::default()
    }
}

fn bistro() -> ScriptedBrowser {
    ScriptedBrowser::new(vec![
        ScriptedReview::new("amy", "great food and friendly staff")
            .with_rating("5 stars")
            .with_authored("2020-01-01"),
        ScriptedReview::new("ben", "bad service, long wait")
            .with_rating("2 stars")
            .with_authored("2020-02-01"),
        ScriptedReview::new("cat", "").without_rating(),
        ScriptedReview::new("dan", "great noodles")
            .with_truncated_comment("great noodles, bad parking"),
    ])
}

fn distill_settings(qa: &ServiceStub, llm: &ServiceStub, engine: LlmEngine) -> DistillSettings {
    DistillSettings {
        qa_endpoint: format!("{}/qa", qa.base_url),
        llm_engine: engine,
        openai_base_url: format!("{}/v1", llm.base_url),
        gemini_base_url: format!("{}/v1beta", llm.base_url),
        request_timeout_secs: 10,
        ..DistillSettings::default()
    }
}

fn service(
    browser: &ScriptedBrowser,
    backend: DistillationBackend,
    data_dir: &std::path::Path,
) -> ReviewService {
    let store_settings = StoreSettings {
        data_dir: data_dir.to_path_buf(),
        ..StoreSettings::default()
    };
    let repository = ReviewRepository::new(
        Arc::new(LocalFsDocumentStore::new(data_dir)),
        &store_settings,
    );
    let runner = Arc::new(ScrapeRunner::new(
        Collector::new(Arc::new(browser.clone()), fast_browser()),
        backend,
        repository,
    ));
    ReviewService::new(runner, StatusTracker::new(), 1, 7)
}

#[tokio::test]
async fn scrape_distill_and_incremental_rescrape_over_http_services() -> anyhow::Result<()> {
    let qa = ServiceStub::spawn(qa_reply);
    let llm = ServiceStub::spawn(|request| openai_reply(request, "評分：7/10\n優點明顯"));
    let secrets = Secrets {
        openai_api_key: Some("sk-test".to_owned()),
        qa_token: Some("hf-test".to_owned()),
        ..Secrets::default()
    };
    let backend = DistillationBackend::from_config(
        &distill_settings(&qa, &llm, LlmEngine::Openai),
        &secrets,
    )?;

    let dir = tempfile::tempdir()?;
    let browser = bistro();
    let service = service(&browser, backend, dir.path());

    let TriggerOutcome::Started(status) = service.scrape_now("Example Bistro", false).await? else {
        panic!("first scrape must run");
    };
    assert_eq!(status.status, ScrapeState::Completed, "{status:?}");
    assert_eq!(status.total_reviews, 4);
    assert_eq!(status.summary_error, None);
    assert_eq!(browser.typed_queries(), vec!["Example Bistro"]);

    let reviews = service.reviews("Example Bistro").await?;
    assert_eq!(reviews.len(), 4);
    let dan = reviews.iter().find(|r| r.reviewer == "dan").unwrap();
    assert_eq!(dan.comment, "great noodles, bad parking");
    let cat = reviews.iter().find(|r| r.reviewer == "cat").unwrap();
    assert_eq!(cat.rating, reviewdigest::formats::NO_RATING);

    let analysis = service.analysis("Example Bistro").await?.unwrap();
    assert_eq!(analysis.findings.positives, vec!["great food"]);
    assert_eq!(analysis.findings.negatives, vec!["bad service"]);
    assert_eq!(analysis.summary.as_deref(), Some("評分：7/10\n優點明顯"));
    assert!(analysis.last_scraped.is_some());

    // Empty comments never reach the QA service; three questions per review.
    let qa_requests = qa.requests();
    assert_eq!(qa_requests.len(), 9);
    assert!(
        qa_requests
            .iter()
            .all(|r| r.header("authorization") == Some("Bearer hf-test"))
    );

    let llm_requests = llm.requests();
    assert_eq!(llm_requests.len(), 2);
    let temperature = llm_requests[0].body["temperature"].as_f64().unwrap();
    assert!((temperature - 0.3).abs() < 1e-6, "{temperature}");
    assert_eq!(
        llm_requests[1].body["max_output_tokens"],
        serde_json::json!(1024)
    );
    assert_eq!(
        llm_requests[1].header("authorization"),
        Some("Bearer sk-test")
    );

    assert!(matches!(
        service.scrape_now("Example Bistro", false).await?,
        TriggerOutcome::NotDue
    ));

    // Dated reviews predate the watermark; undated ones are kept again.
    let TriggerOutcome::Started(status) = service.scrape_now("Example Bistro", true).await? else {
        panic!("forced scrape must run");
    };
    assert_eq!(status.status, ScrapeState::Completed, "{status:?}");
    assert_eq!(service.reviews("Example Bistro").await?.len(), 6);
    assert_eq!(browser.launches(), 2);

    // The analysis is rebuilt over all six stored reviews, four with comments.
    assert_eq!(qa.requests().len(), 9 + 12);
    let rescraped = service.analysis("Example Bistro").await?.unwrap();
    assert_eq!(rescraped.findings, analysis.findings);
    assert_eq!(rescraped.summary.as_deref(), Some("評分：7/10\n優點明顯"));
    assert!(rescraped.last_scraped >= analysis.last_scraped);
    Ok(())
}

#[tokio::test]
async fn gemini_engine_uses_its_sampling_and_key_header() -> anyhow::Result<()> {
    let qa = ServiceStub::spawn(qa_reply);
    let llm = ServiceStub::spawn(|request| gemini_reply(request, "評分：9/10"));
    let secrets = Secrets {
        gemini_api_key: Some("gm-test".to_owned()),
        ..Secrets::default()
    };
    let backend = DistillationBackend::from_config(
        &distill_settings(&qa, &llm, LlmEngine::Gemini),
        &secrets,
    )?;

    let dir = tempfile::tempdir()?;
    let browser = bistro();
    let service = service(&browser, backend, dir.path());

    let TriggerOutcome::Started(status) = service.scrape_now("Example Bistro", false).await? else {
        panic!("scrape must run");
    };
    assert_eq!(status.status, ScrapeState::Completed, "{status:?}");

    let analysis = service.analysis("Example Bistro").await?.unwrap();
    assert_eq!(analysis.summary.as_deref(), Some("評分：9/10"));

    let llm_requests = llm.requests();
    assert_eq!(llm_requests.len(), 2);
    for request in &llm_requests {
        assert!(request.path.ends_with(":generateContent"));
        assert_eq!(request.header("x-goog-api-key"), Some("gm-test"));
        let config = &request.body["generationConfig"];
        assert_eq!(config["maxOutputTokens"], serde_json::json!(8192));
        assert_eq!(config["topK"], serde_json::json!(10));
    }
    assert!(
        qa.requests()
            .iter()
            .all(|r| r.header("authorization").is_none())
    );
    Ok(())
}

#[tokio::test]
async fn failing_narrative_keeps_findings_and_reports_summary_error() -> anyhow::Result<()> {
    let qa = ServiceStub::spawn(qa_reply);
    let llm = ServiceStub::spawn(|request| {
        let input = request.body["input"].as_str().unwrap_or_default();
        if input.contains("原始優點列表") {
            openai_reply(request, "")
        } else {
            (
                429,
                serde_json::json!({ "error": { "message": "rate limited" } }),
            )
        }
    });
    let secrets = Secrets {
        openai_api_key: Some("sk-test".to_owned()),
        ..Secrets::default()
    };
    let backend = DistillationBackend::from_config(
        &distill_settings(&qa, &llm, LlmEngine::Openai),
        &secrets,
    )?;

    let dir = tempfile::tempdir()?;
    let service = service(&bistro(), backend, dir.path());

    let TriggerOutcome::Started(status) = service.scrape_now("Example Bistro", false).await? else {
        panic!("scrape must run");
    };
    assert_eq!(status.status, ScrapeState::Completed);
    let summary_error = status.summary_error.unwrap();
    assert!(summary_error.contains("rate limited"), "{summary_error}");

    let analysis = service.analysis("Example Bistro").await?.unwrap();
    assert_eq!(analysis.summary, None);
    assert_eq!(analysis.findings.positives, vec!["great food"]);
    Ok(())
}

#[tokio::test]
async fn redistill_rebuilds_analysis_from_the_store() -> anyhow::Result<()> {
    let qa = ServiceStub::spawn(qa_reply);
    let llm = ServiceStub::spawn(|request| openai_reply(request, "評分：5/10"));
    let secrets = Secrets {
        openai_api_key: Some("sk-test".to_owned()),
        ..Secrets::default()
    };
    let backend = DistillationBackend::from_config(
        &distill_settings(&qa, &llm, LlmEngine::Openai),
        &secrets,
    )?;

    let dir = tempfile::tempdir()?;
    let browser = bistro();
    let service = service(&browser, backend, dir.path());
    service.scrape_now("Example Bistro", false).await?;
    let before = service.analysis("Example Bistro").await?.unwrap();

    let TriggerOutcome::Started(status) = service.redistill("Example Bistro", true).await? else {
        panic!("redistill must run");
    };
    assert_eq!(status.status, ScrapeState::Completed, "{status:?}");
    assert_eq!(browser.launches(), 1);

    let after = service.analysis("Example Bistro").await?.unwrap();
    assert_eq!(after.last_scraped, before.last_scraped);
    assert_eq!(after.findings, before.findings);
    Ok(())
}
