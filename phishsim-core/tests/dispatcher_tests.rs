// File: phishsim-core/tests/dispatcher_tests.rs
//
// Dispatcher behavior against in-memory repositories and a scriptable mail
// fake: snapshot-on-launch, bounded retry, failure isolation, cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use phishsim_common::models::campaign::{CampaignCounters, CampaignStatus, TargetSelector};
use phishsim_common::models::recipient::{Recipient, Role};
use phishsim_common::models::result::{ClientInfo, PhishingResult, ResultStatus};
use phishsim_common::models::template::{Difficulty, PhishingTemplate, TemplateCategory};
use phishsim_common::traits::repository_traits::{
    CampaignRepository, ResultRepository, TemplateRepository,
};
use phishsim_core::collaborators::{MailTransport, UserDirectory};
use phishsim_core::services::{CampaignDispatcher, CampaignService, DispatcherConfig};
use phishsim_core::test_utils::memory::{
    MemoryCampaignRepository, MemoryResultRepository, MemoryTemplateRepository,
};
use phishsim_core::token;
use phishsim_core::Error;

struct FixedDirectory {
    recipients: Vec<Recipient>,
}

#[async_trait]
impl UserDirectory for FixedDirectory {
    async fn resolve_targets(
        &self,
        _company_id: Uuid,
        _selector: &TargetSelector,
    ) -> Result<Vec<Recipient>, Error> {
        Ok(self.recipients.clone())
    }

    async fn get_role(&self, _user_id: Uuid) -> Result<Role, Error> {
        Ok(Role::Employee)
    }
}

#[derive(Default)]
struct FakeMail {
    sent: Mutex<Vec<String>>,
    /// Addresses the provider rejects outright.
    permanent_fail: Vec<String>,
    /// Remaining transient failures per address.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// When present, each send must acquire a permit first.
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl MailTransport for FakeMail {
    async fn send(&self, to: &str, _subject: &str, _html: &str) -> Result<(), Error> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("mail gate closed").forget();
        }
        if self.permanent_fail.iter().any(|a| a == to) {
            return Err(Error::PermanentSend(format!("mailbox {to} does not exist")));
        }
        {
            let mut failures = self.transient_failures.lock().await;
            if let Some(left) = failures.get_mut(to) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::TransientSend("provider 503".into()));
                }
            }
        }
        self.sent.lock().await.push(to.to_string());
        Ok(())
    }
}

fn recipient(email: &str) -> Recipient {
    Recipient {
        user_id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: None,
        role: Role::Employee,
        department: Some("engineering".to_string()),
    }
}

struct Fixture {
    templates: Arc<MemoryTemplateRepository>,
    campaigns: Arc<MemoryCampaignRepository>,
    results: Arc<MemoryResultRepository>,
    dispatcher: Arc<CampaignDispatcher>,
    service: CampaignService,
    company_id: Uuid,
}

fn fixture(mail: FakeMail, recipients: Vec<Recipient>) -> Fixture {
    fixture_with(mail, recipients, 4, Duration::from_millis(10))
}

fn fixture_with_workers(mail: FakeMail, recipients: Vec<Recipient>, workers: usize) -> Fixture {
    fixture_with(mail, recipients, workers, Duration::from_millis(10))
}

fn fixture_with(
    mail: FakeMail,
    recipients: Vec<Recipient>,
    workers: usize,
    retry_base_delay: Duration,
) -> Fixture {
    let templates = Arc::new(MemoryTemplateRepository::new());
    let campaigns = Arc::new(MemoryCampaignRepository::new());
    let results = Arc::new(MemoryResultRepository::new(campaigns.clone()));
    let directory = Arc::new(FixedDirectory { recipients });

    let config = DispatcherConfig {
        workers,
        send_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_base_delay,
        base_url: "https://px.example.com".to_string(),
    };
    let dispatcher = Arc::new(CampaignDispatcher::new(
        campaigns.clone(),
        templates.clone(),
        results.clone(),
        Arc::new(mail),
        directory,
        config,
    ));
    let service = CampaignService::new(
        templates.clone(),
        campaigns.clone(),
        results.clone(),
        dispatcher.clone(),
    );
    Fixture {
        templates,
        campaigns,
        results,
        dispatcher,
        service,
        company_id: Uuid::new_v4(),
    }
}

async fn make_campaign(fx: &Fixture) -> Uuid {
    let template = PhishingTemplate::new(
        fx.company_id,
        "payroll update",
        TemplateCategory::Credential,
        Difficulty::Medium,
        "Action required: payroll",
        r#"<a href="{{tracking_url}}">review</a>"#,
    );
    fx.templates.create_template(&template).await.unwrap();
    let campaign = fx
        .service
        .create_campaign(
            fx.company_id,
            template.template_id,
            "q3 payroll drill",
            TargetSelector {
                departments: vec!["engineering".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    campaign.campaign_id
}

/// Poll the counters until sent + bounced reaches `expected`.
async fn wait_for_dispatch(fx: &Fixture, campaign_id: Uuid, expected: i64) {
    for _ in 0..300 {
        let c = fx.results.campaign_counters(campaign_id).await.unwrap();
        if c.sent + c.bounced >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dispatch did not settle in time");
}

#[tokio::test]
async fn launch_sends_to_every_resolved_recipient() {
    let fx = fixture(
        FakeMail::default(),
        vec![recipient("a@corp.test"), recipient("b@corp.test"), recipient("c@corp.test")],
    );
    let campaign_id = make_campaign(&fx).await;

    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 3).await;

    let counters = fx.results.campaign_counters(campaign_id).await.unwrap();
    assert_eq!(counters.total, 3);
    assert_eq!(counters.sent, 3);
    assert_eq!(counters.bounced, 0);

    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Running);
    assert!(campaign.started_at.is_some());
}

#[tokio::test]
async fn launch_mints_unique_well_formed_tokens() {
    let fx = fixture(
        FakeMail::default(),
        (0..10).map(|i| recipient(&format!("user{i}@corp.test"))).collect(),
    );
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 10).await;

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    assert_eq!(rows.len(), 10);
    let mut tokens: Vec<&str> = rows.iter().map(|r| r.tracking_id.as_str()).collect();
    assert!(tokens.iter().all(|t| token::is_well_formed(t)));
    tokens.sort_unstable();
    tokens.dedup();
    assert_eq!(tokens.len(), 10, "tracking tokens must be unique");
}

#[tokio::test]
async fn permanent_failure_bounces_without_blocking_others() {
    let mail = FakeMail {
        permanent_fail: vec!["gone@corp.test".to_string()],
        ..Default::default()
    };
    let fx = fixture(
        mail,
        vec![recipient("a@corp.test"), recipient("gone@corp.test"), recipient("c@corp.test")],
    );
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 3).await;

    let counters = fx.results.campaign_counters(campaign_id).await.unwrap();
    assert_eq!(counters.sent, 2);
    assert_eq!(counters.bounced, 1);
    assert_eq!(counters.sent + counters.bounced, counters.total);

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    let bounced = rows.iter().find(|r| r.status == ResultStatus::Bounced).unwrap();
    // no retries for a hard bounce
    assert_eq!(bounced.send_attempts, 1);
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let mail = FakeMail {
        transient_failures: Mutex::new(HashMap::from([("flaky@corp.test".to_string(), 1u32)])),
        ..Default::default()
    };
    let fx = fixture(mail, vec![recipient("flaky@corp.test")]);
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 1).await;

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    assert_eq!(rows[0].status, ResultStatus::Sent);
    assert_eq!(rows[0].send_attempts, 2);

    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.send_failures, 0);
}

#[tokio::test]
async fn exhausted_retry_budget_is_reported_not_swallowed() {
    let mail = FakeMail {
        transient_failures: Mutex::new(HashMap::from([("down@corp.test".to_string(), 99u32)])),
        ..Default::default()
    };
    let fx = fixture(mail, vec![recipient("down@corp.test"), recipient("ok@corp.test")]);
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 2).await;

    let counters = fx.results.campaign_counters(campaign_id).await.unwrap();
    assert_eq!(counters.sent, 1);
    assert_eq!(counters.bounced, 1);

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    let bounced = rows.iter().find(|r| r.status == ResultStatus::Bounced).unwrap();
    assert_eq!(bounced.send_attempts, 3);

    // surfaced on the campaign, never silently dropped
    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.send_failures, 1);
}

#[tokio::test]
async fn launch_with_no_recipients_fails_synchronously() {
    let fx = fixture(FakeMail::default(), vec![]);
    let campaign_id = make_campaign(&fx).await;

    let err = fx.service.launch(campaign_id).await.unwrap_err();
    assert!(matches!(err, Error::CampaignState(_)), "got {err:?}");

    // the campaign must not have moved
    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Draft);
}

#[tokio::test]
async fn excluded_users_are_dropped_from_the_snapshot() {
    let excluded = recipient("vip@corp.test");
    let fx = fixture(
        FakeMail::default(),
        vec![recipient("a@corp.test"), excluded.clone()],
    );
    let campaign_id = make_campaign(&fx).await;
    {
        // exclusion list is part of the campaign definition
        let mut campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
        campaign.excluded_user_ids.push(excluded.user_id);
        fx.campaigns.create_campaign(&campaign).await.unwrap();
    }

    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 1).await;

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].user_id, excluded.user_id);
}

#[tokio::test]
async fn launch_snapshots_template_content() {
    let fx = fixture(FakeMail::default(), vec![recipient("a@corp.test")]);
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 1).await;

    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    let snapshot = campaign.template_snapshot.expect("snapshot taken at launch");
    assert_eq!(snapshot.subject, "Action required: payroll");
    assert_eq!(snapshot.category, TemplateCategory::Credential);
}

#[tokio::test]
async fn cancel_halts_outstanding_sends_between_units_of_work() {
    let gate = Arc::new(Semaphore::new(0));
    let mail = FakeMail {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    // single worker so the send order is deterministic
    let fx = fixture_with_workers(
        mail,
        (0..5).map(|i| recipient(&format!("user{i}@corp.test"))).collect(),
        1,
    );

    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();

    // let exactly two sends through, then cancel mid-campaign
    gate.add_permits(2);
    wait_for_dispatch(&fx, campaign_id, 2).await;
    fx.dispatcher.cancel(campaign_id).await.unwrap();

    // the worker may finish the one send it already started, nothing more
    gate.add_permits(3);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let counters = fx.results.campaign_counters(campaign_id).await.unwrap();
    assert!(counters.sent <= 3, "cancel must stop further sends, sent={}", counters.sent);
    assert!(counters.total - counters.sent - counters.bounced >= 2, "some rows stay pending");

    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Cancelled);
}

#[tokio::test]
async fn cancel_during_retry_backoff_abandons_the_send() {
    let mail = FakeMail {
        transient_failures: Mutex::new(HashMap::from([("down@corp.test".to_string(), 99u32)])),
        ..Default::default()
    };
    // long backoff so the cancel lands while the worker sleeps it out
    let fx = fixture_with(
        mail,
        vec![recipient("down@corp.test")],
        1,
        Duration::from_millis(400),
    );
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();

    // first attempt fails fast; the worker is now inside its 400ms backoff
    tokio::time::sleep(Duration::from_millis(100)).await;
    fx.service.cancel(campaign_id).await.unwrap();

    // enough wall time for attempts two and three, had the backoff ignored
    // the cancel until the next between-jobs check
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let rows = fx.results.list_for_campaign(campaign_id).await.unwrap();
    assert_eq!(
        rows[0].status,
        ResultStatus::Pending,
        "the abandoned send stays pending, not bounced"
    );

    let campaign = fx.campaigns.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Cancelled);
    assert_eq!(campaign.send_failures, 0, "a cancelled retry is not a send failure");
}

/// Result store that refuses inserts once a budget runs out, the way a
/// database outage mid-launch would.
struct FailingResults {
    inner: Arc<MemoryResultRepository>,
    insert_budget: usize,
    inserted: AtomicUsize,
}

#[async_trait]
impl ResultRepository for FailingResults {
    async fn create_result(&self, result: &PhishingResult) -> Result<(), Error> {
        if self.inserted.fetch_add(1, Ordering::SeqCst) >= self.insert_budget {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }
        self.inner.create_result(result).await
    }

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        self.inner.get_by_tracking_id(tracking_id).await
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<PhishingResult>, Error> {
        self.inner.list_for_campaign(campaign_id).await
    }

    async fn mark_sent(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        self.inner.mark_sent(result_id, attempts).await
    }

    async fn mark_bounced(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        self.inner.mark_bounced(result_id, attempts).await
    }

    async fn record_open(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        self.inner.record_open(tracking_id, client).await
    }

    async fn record_click(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        self.inner.record_click(tracking_id, client).await
    }

    async fn record_submit(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        self.inner.record_submit(tracking_id, client).await
    }

    async fn record_report(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        self.inner.record_report(tracking_id).await
    }

    async fn set_training_required(&self, result_id: Uuid) -> Result<bool, Error> {
        self.inner.set_training_required(result_id).await
    }

    async fn set_training_completed(&self, result_id: Uuid) -> Result<(), Error> {
        self.inner.set_training_completed(result_id).await
    }

    async fn campaign_counters(&self, campaign_id: Uuid) -> Result<CampaignCounters, Error> {
        self.inner.campaign_counters(campaign_id).await
    }

    async fn user_history(
        &self,
        user_id: Uuid,
        completed_since: DateTime<Utc>,
    ) -> Result<Vec<PhishingResult>, Error> {
        self.inner.user_history(user_id, completed_since).await
    }
}

#[tokio::test]
async fn failed_row_creation_leaves_the_campaign_launchable() {
    let templates = Arc::new(MemoryTemplateRepository::new());
    let campaigns = Arc::new(MemoryCampaignRepository::new());
    let results = Arc::new(FailingResults {
        inner: Arc::new(MemoryResultRepository::new(campaigns.clone())),
        insert_budget: 1,
        inserted: AtomicUsize::new(0),
    });
    let mail = Arc::new(FakeMail::default());
    let directory = Arc::new(FixedDirectory {
        recipients: vec![recipient("a@corp.test"), recipient("b@corp.test")],
    });
    let dispatcher = Arc::new(CampaignDispatcher::new(
        campaigns.clone(),
        templates.clone(),
        results.clone(),
        mail.clone(),
        directory,
        DispatcherConfig {
            workers: 2,
            send_timeout: Duration::from_secs(2),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(10),
            base_url: "https://px.example.com".to_string(),
        },
    ));
    let service = CampaignService::new(
        templates.clone(),
        campaigns.clone(),
        results.clone(),
        dispatcher,
    );

    let company_id = Uuid::new_v4();
    let template = PhishingTemplate::new(
        company_id,
        "payroll update",
        TemplateCategory::Credential,
        Difficulty::Medium,
        "Action required: payroll",
        r#"<a href="{{tracking_url}}">review</a>"#,
    );
    templates.create_template(&template).await.unwrap();
    let campaign = service
        .create_campaign(
            company_id,
            template.template_id,
            "q3 payroll drill",
            TargetSelector {
                departments: vec!["engineering".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = service.launch(campaign.campaign_id).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)), "got {err:?}");

    // a half-created row set must not strand a running campaign with no
    // send loop behind it; the launch stays retryable
    let stored = campaigns.get_campaign(campaign.campaign_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Draft);
    assert!(stored.started_at.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(mail.sent.lock().await.is_empty(), "nothing may be mailed on a failed launch");
}

#[tokio::test]
async fn cancel_is_illegal_once_completed() {
    let fx = fixture(FakeMail::default(), vec![recipient("a@corp.test")]);
    let campaign_id = make_campaign(&fx).await;
    fx.service.launch(campaign_id).await.unwrap();
    wait_for_dispatch(&fx, campaign_id, 1).await;

    fx.campaigns
        .transition_status(campaign_id, &[CampaignStatus::Running], CampaignStatus::Completed)
        .await
        .unwrap();

    let err = fx.service.cancel(campaign_id).await.unwrap_err();
    assert!(matches!(err, Error::CampaignState(_)));
}
