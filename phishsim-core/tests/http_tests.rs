// File: phishsim-core/tests/http_tests.rs
//
// The public tracking endpoints driven through the axum router itself:
// every route must answer with the same shape whether or not the token
// resolves, so the surface cannot be used to enumerate recipients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use phishsim_common::models::campaign::{CampaignStatus, PhishingCampaign, TargetSelector};
use phishsim_common::models::result::{PhishingResult, ResultStatus};
use phishsim_common::traits::repository_traits::{CampaignRepository, ResultRepository};
use phishsim_core::http::tracking_router;
use phishsim_core::services::{TrackingPages, TrackingService, TrainingAssignment};
use phishsim_core::test_utils::memory::{MemoryCampaignRepository, MemoryResultRepository};
use phishsim_core::token;

const LANDING: &str = "https://training.example.com/phished";
const NEUTRAL: &str = "https://www.example.com/";

struct Fixture {
    results: Arc<MemoryResultRepository>,
    router: Router,
    campaign_id: Uuid,
    _training_rx: mpsc::Receiver<TrainingAssignment>,
    _risk_rx: mpsc::Receiver<Uuid>,
}

async fn fixture() -> Fixture {
    let campaigns = Arc::new(MemoryCampaignRepository::new());
    let results = Arc::new(MemoryResultRepository::new(campaigns.clone()));

    let mut campaign = PhishingCampaign::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "router fixture",
        TargetSelector {
            departments: vec!["all".to_string()],
            ..Default::default()
        },
    );
    campaign.status = CampaignStatus::Running;
    campaign.started_at = Some(Utc::now());
    let campaign_id = campaign.campaign_id;
    campaigns.create_campaign(&campaign).await.unwrap();

    let (training_tx, training_rx) = mpsc::channel(16);
    let (risk_tx, risk_rx) = mpsc::channel(16);
    let service = TrackingService::new(
        results.clone(),
        campaigns.clone(),
        training_tx,
        risk_tx,
        TrackingPages {
            landing_url: LANDING.to_string(),
            neutral_url: NEUTRAL.to_string(),
        },
    );

    Fixture {
        results,
        router: tracking_router(Arc::new(service)),
        campaign_id,
        _training_rx: training_rx,
        _risk_rx: risk_rx,
    }
}

async fn sent_row(fx: &Fixture) -> String {
    let tracking_id = token::mint_tracking_id().unwrap();
    let row = PhishingResult::new(fx.campaign_id, Uuid::new_v4(), tracking_id.clone());
    fx.results.create_result(&row).await.unwrap();
    fx.results.mark_sent(row.result_id, 1).await.unwrap();
    tracking_id
}

/// The router is exercised without a real socket, so the peer address the
/// handlers extract is injected as a request extension.
fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 4711))))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn open_pixel_is_served_for_resolved_and_garbage_tokens() {
    let fx = fixture().await;
    let tok = sent_row(&fx).await;

    for uri in [
        format!("/phishing/open/{tok}"),
        "/phishing/open/not-a-token".to_string(),
    ] {
        let resp = fx
            .router
            .clone()
            .oneshot(request(Method::GET, &uri))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/gif", "{uri}");
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        assert!(body.starts_with(b"GIF89a"), "{uri} must serve the pixel");
    }

    // only the resolved token moved a row
    let row = fx.results.get_by_tracking_id(&tok).await.unwrap().unwrap();
    assert_eq!(row.status, ResultStatus::Opened);
    assert_eq!(row.open_count, 1);
}

#[tokio::test]
async fn track_redirects_resolved_tokens_to_the_landing_page() {
    let fx = fixture().await;
    let tok = sent_row(&fx).await;

    let resp = fx
        .router
        .clone()
        .oneshot(request(Method::GET, &format!("/phishing/track/{tok}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], LANDING);

    let row = fx.results.get_by_tracking_id(&tok).await.unwrap().unwrap();
    assert_eq!(row.status, ResultStatus::Clicked);
}

#[tokio::test]
async fn track_redirects_unknown_tokens_to_the_neutral_page() {
    let fx = fixture().await;
    let _known = sent_row(&fx).await;

    let unknown = token::mint_tracking_id().unwrap();
    for uri in [
        format!("/phishing/track/{unknown}"),
        "/phishing/track/gibberish".to_string(),
    ] {
        let resp = fx
            .router
            .clone()
            .oneshot(request(Method::GET, &uri))
            .await
            .unwrap();
        // same 302 as the real thing, pointed somewhere harmless
        assert_eq!(resp.status(), StatusCode::FOUND, "{uri}");
        assert_eq!(resp.headers()[header::LOCATION], NEUTRAL, "{uri}");
    }
    assert!(fx.results.get_by_tracking_id(&unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn submit_redirects_and_records_the_terminal_stage() {
    let fx = fixture().await;
    let tok = sent_row(&fx).await;

    let resp = fx
        .router
        .clone()
        .oneshot(request(Method::POST, &format!("/phishing/submit/{tok}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], LANDING);

    let row = fx.results.get_by_tracking_id(&tok).await.unwrap().unwrap();
    assert_eq!(row.status, ResultStatus::DataSubmitted);

    let resp = fx
        .router
        .clone()
        .oneshot(request(Method::POST, "/phishing/submit/not-a-token"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], NEUTRAL);
}

#[tokio::test]
async fn report_answers_200_whether_or_not_the_token_exists() {
    let fx = fixture().await;
    let tok = sent_row(&fx).await;

    for uri in [
        format!("/phishing/report/{tok}"),
        format!("/phishing/report/{}", token::mint_tracking_id().unwrap()),
        "/phishing/report/not-a-token".to_string(),
    ] {
        let resp = fx
            .router
            .clone()
            .oneshot(request(Method::POST, &uri))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
    }

    let row = fx.results.get_by_tracking_id(&tok).await.unwrap().unwrap();
    assert!(row.reported);
}
