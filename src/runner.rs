// src/runner.rs
//
// Campaign runner: drives one pass of render -> send -> log per recipient,
// then reconciles the campaign's terminal status and counters. A run is
// claimed with a single check-and-set UPDATE so at most one run per campaign
// id is ever active.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai::{build_llm_client, DynLlmClient, LlmClient};
use crate::config::Config;
use crate::db::models::{Campaign, CampaignStatus, Contact, EmailStatus, Template};
use crate::db::DbPool;
use crate::mailer::{build_mailer, DynMailer, MailError, Mailer};
use crate::template;

/// Orchestration-level failures. Per-recipient failures never surface here;
/// they are folded into the run tally instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("template {0} not found")]
    TemplateNotFound(Uuid),

    #[error(transparent)]
    Mail(#[from] MailError),
}

/// What happened to a single contact reference during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Rendered, sent, and logged with status=sent.
    Sent,
    /// Counted as a failure; a log row exists only if a send was attempted.
    Failed(String),
    /// The reference no longer points to a contact. Counted as a failure,
    /// but no log row is written: there was never an address to log against.
    SkippedMissing,
}

/// Running sent/failed counters for one campaign pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTally {
    pub sent: i32,
    pub failed: i32,
}

impl RunTally {
    pub fn record(&mut self, outcome: &RecipientOutcome) {
        match outcome {
            RecipientOutcome::Sent => self.sent += 1,
            RecipientOutcome::Failed(_) | RecipientOutcome::SkippedMissing => self.failed += 1,
        }
    }
}

/// Persistence used by a run. The loop only touches the store through this
/// trait, so recipient outcomes can be exercised without Postgres.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn fetch_template(&self, id: Uuid) -> Result<Option<Template>, sqlx::Error>;

    async fn fetch_contact(&self, id: Uuid) -> Result<Option<Contact>, sqlx::Error>;

    async fn insert_email_log(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        template: &Template,
        body: &str,
        status: EmailStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    async fn mark_campaign_completed(
        &self,
        campaign_id: Uuid,
        tally: RunTally,
    ) -> Result<(), sqlx::Error>;

    async fn mark_campaign_failed(&self, campaign_id: Uuid) -> Result<(), sqlx::Error>;
}

/// Atomically move a sendable campaign to `in_progress`, resetting counters
/// and stamping `started_at`. Returns `None` when the campaign is missing or
/// not in a sendable state, leaving it untouched either way.
///
/// A re-send restarts counting for the whole campaign, not just failures.
pub async fn try_claim_campaign(
    pool: &DbPool,
    campaign_id: Uuid,
) -> Result<Option<Campaign>, sqlx::Error> {
    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE campaigns
        SET status = $2,
            started_at = NOW(),
            updated_at = NOW(),
            sent_count = 0,
            failed_count = 0
        WHERE id = $1
          AND status IN ('draft', 'scheduled', 'paused')
        RETURNING
            id,
            name,
            template_id,
            contact_ids,
            description,
            status,
            scheduled_at,
            started_at,
            completed_at,
            total_emails,
            sent_count,
            failed_count,
            created_at,
            updated_at
        "#,
    )
    .bind(campaign_id)
    .bind(CampaignStatus::InProgress.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(campaign)
}

/// Entry point for the background unit of work spawned by the send route.
/// `campaign` must already be claimed via [`try_claim_campaign`].
pub async fn run_campaign(pool: DbPool, cfg: Config, campaign: Campaign, dry_run: bool) {
    let campaign_id = campaign.id;

    if let Err(err) = run_to_completion(&pool, &cfg, campaign, dry_run).await {
        error!("Fatal error in campaign {}: {}", campaign_id, err);

        if let Err(e) = pool.mark_campaign_failed(campaign_id).await {
            error!("Failed to mark campaign {} as failed: {:?}", campaign_id, e);
        }
    }
}

async fn run_to_completion(
    store: &dyn RunStore,
    cfg: &Config,
    campaign: Campaign,
    dry_run: bool,
) -> Result<(), RunError> {
    // The template is read once; later edits do not affect this run.
    let template = store
        .fetch_template(campaign.template_id)
        .await?
        .ok_or(RunError::TemplateNotFound(campaign.template_id))?;

    let mailer = build_mailer(&cfg.smtp, dry_run)?;

    let llm: Option<DynLlmClient> = if template.use_llm {
        Some(build_llm_client(&cfg.ollama))
    } else {
        None
    };

    let mut tally = RunTally::default();

    for (i, contact_id) in campaign.contact_ids.iter().enumerate() {
        info!(
            "[{}/{}] Campaign {}: processing contact {}",
            i + 1,
            campaign.contact_ids.len(),
            campaign.id,
            contact_id
        );

        let outcome =
            process_recipient(store, &mailer, llm.as_ref(), &campaign, &template, *contact_id)
                .await;
        tally.record(&outcome);
    }

    store.mark_campaign_completed(campaign.id, tally).await?;

    info!(
        "Campaign {} completed: {} sent, {} failed",
        campaign.id, tally.sent, tally.failed
    );

    Ok(())
}

/// Process one contact reference. Every failure mode inside this boundary is
/// converted into an outcome; nothing escapes to abort the run.
async fn process_recipient(
    store: &dyn RunStore,
    mailer: &DynMailer,
    llm: Option<&DynLlmClient>,
    campaign: &Campaign,
    template: &Template,
    contact_id: Uuid,
) -> RecipientOutcome {
    let contact = match store.fetch_contact(contact_id).await {
        Ok(Some(contact)) => contact,
        Ok(None) => {
            warn!("Contact {} not found, skipping", contact_id);
            return RecipientOutcome::SkippedMissing;
        }
        Err(err) => {
            error!("Error loading contact {}: {:?}", contact_id, err);
            return RecipientOutcome::Failed(err.to_string());
        }
    };

    let vars = build_recipient_vars(&contact);

    // Personalization failure is a hard error for this recipient: no send is
    // attempted and no log row is written.
    let body = match llm {
        Some(llm) => match llm.generate_email(&template.content, &vars).await {
            Ok(body) => body,
            Err(err) => {
                error!("Error generating email for {}: {}", contact.email, err);
                return RecipientOutcome::Failed(err.to_string());
            }
        },
        None => template::render(&template.content, &vars),
    };

    let outcome = mailer.send(&contact.email, &template.subject, &body).await;

    let status = if outcome.success {
        EmailStatus::Sent
    } else {
        EmailStatus::Failed
    };

    // Dry runs write the same log rows as real runs. A logging failure is
    // reported but never changes the outcome.
    if let Err(err) = store
        .insert_email_log(
            campaign,
            &contact,
            template,
            &body,
            status,
            outcome.error.as_deref(),
        )
        .await
    {
        error!("Failed to log email to database: {:?}", err);
    }

    if outcome.success {
        RecipientOutcome::Sent
    } else {
        let reason = outcome.error.unwrap_or_else(|| "send failed".to_string());
        error!("Failed to send to {}: {}", contact.email, reason);
        RecipientOutcome::Failed(reason)
    }
}

/// Flat variable map for one recipient: reserved keys first, custom fields
/// overlaid afterwards so they may shadow the reserved keys.
pub fn build_recipient_vars(contact: &Contact) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("email".to_string(), contact.email.clone());
    vars.insert(
        "first_name".to_string(),
        contact.first_name.clone().unwrap_or_default(),
    );
    vars.insert(
        "last_name".to_string(),
        contact.last_name.clone().unwrap_or_default(),
    );

    for (key, value) in contact.custom_fields.0.iter() {
        vars.insert(key.clone(), value.clone());
    }

    vars
}

#[async_trait]
impl RunStore for DbPool {
    async fn fetch_template(&self, id: Uuid) -> Result<Option<Template>, sqlx::Error> {
        sqlx::query_as::<_, Template>(
            r#"
            SELECT id, name, subject, content, description, placeholders, use_llm,
                   created_at, updated_at
            FROM templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self)
        .await
    }

    async fn fetch_contact(&self, id: Uuid) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, email, first_name, last_name, custom_fields, tags, active,
                   created_at, updated_at
            FROM contacts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self)
        .await
    }

    async fn insert_email_log(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        template: &Template,
        body: &str,
        status: EmailStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let sent_at = matches!(status, EmailStatus::Sent);

        sqlx::query(
            r#"
            INSERT INTO email_logs (
                campaign_id,
                contact_id,
                template_id,
                subject,
                body,
                status,
                sent_at,
                error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $7 THEN NOW() END, $8)
            "#,
        )
        .bind(campaign.id)
        .bind(contact.id)
        .bind(template.id)
        .bind(&template.subject)
        .bind(body)
        .bind(status.as_str())
        .bind(sent_at)
        .bind(error_message)
        .execute(self)
        .await?;

        Ok(())
    }

    async fn mark_campaign_completed(
        &self,
        campaign_id: Uuid,
        tally: RunTally,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2,
                sent_count = $3,
                failed_count = $4,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(CampaignStatus::Completed.as_str())
        .bind(tally.sent)
        .bind(tally.failed)
        .execute(self)
        .await?;

        Ok(())
    }

    /// Counters are left as last observed; partial tallies are not trusted.
    async fn mark_campaign_failed(&self, campaign_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(CampaignStatus::Failed.as_str())
        .execute(self)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    use super::*;
    use crate::ai::LlmError;
    use crate::config::{AppEnv, OllamaConfig, SmtpConfig};
    use crate::mailer::SendOutcome;

    fn contact(custom_fields: HashMap<String, String>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            first_name: Some("Ana".to_string()),
            last_name: None,
            custom_fields: Json(custom_fields),
            tags: vec![],
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn template(use_llm: bool) -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "Welcome".to_string(),
            subject: "Hello".to_string(),
            content: "Hi $first_name".to_string(),
            description: None,
            placeholders: vec!["first_name".to_string()],
            use_llm,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn campaign(template_id: Uuid, contact_ids: Vec<Uuid>) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "Launch".to_string(),
            template_id,
            total_emails: contact_ids.len() as i32,
            contact_ids,
            description: None,
            status: CampaignStatus::InProgress.as_str().to_string(),
            scheduled_at: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            sent_count: 0,
            failed_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn config() -> Config {
        Config {
            env: AppEnv::Development,
            database_url: None,
            http_port: 3000,
            smtp: SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: String::new(),
                password: String::new(),
                use_tls: true,
                from_email: Some("noreply@example.com".to_string()),
            },
            ollama: OllamaConfig {
                model: "llama2".to_string(),
                host: None,
                temperature: 0.7,
            },
        }
    }

    #[derive(Debug, Clone)]
    struct LoggedEmail {
        contact_id: Uuid,
        status: EmailStatus,
        error_message: Option<String>,
    }

    #[derive(Default)]
    struct MemoryStore {
        contacts: HashMap<Uuid, Contact>,
        templates: HashMap<Uuid, Template>,
        logs: Mutex<Vec<LoggedEmail>>,
        completed: Mutex<Option<RunTally>>,
        failed: Mutex<Vec<Uuid>>,
    }

    impl MemoryStore {
        fn with(contacts: Vec<Contact>, template: Template) -> Self {
            let mut store = Self::default();
            for c in contacts {
                store.contacts.insert(c.id, c);
            }
            store.templates.insert(template.id, template);
            store
        }

        fn logs(&self) -> Vec<LoggedEmail> {
            self.logs.lock().unwrap().clone()
        }

        fn completed_tally(&self) -> Option<RunTally> {
            *self.completed.lock().unwrap()
        }
    }

    #[async_trait]
    impl RunStore for MemoryStore {
        async fn fetch_template(&self, id: Uuid) -> Result<Option<Template>, sqlx::Error> {
            Ok(self.templates.get(&id).cloned())
        }

        async fn fetch_contact(&self, id: Uuid) -> Result<Option<Contact>, sqlx::Error> {
            Ok(self.contacts.get(&id).cloned())
        }

        async fn insert_email_log(
            &self,
            _campaign: &Campaign,
            contact: &Contact,
            _template: &Template,
            _body: &str,
            status: EmailStatus,
            error_message: Option<&str>,
        ) -> Result<(), sqlx::Error> {
            self.logs.lock().unwrap().push(LoggedEmail {
                contact_id: contact.id,
                status,
                error_message: error_message.map(str::to_string),
            });
            Ok(())
        }

        async fn mark_campaign_completed(
            &self,
            _campaign_id: Uuid,
            tally: RunTally,
        ) -> Result<(), sqlx::Error> {
            *self.completed.lock().unwrap() = Some(tally);
            Ok(())
        }

        async fn mark_campaign_failed(&self, campaign_id: Uuid) -> Result<(), sqlx::Error> {
            self.failed.lock().unwrap().push(campaign_id);
            Ok(())
        }
    }

    struct CountingMailer {
        sends: AtomicUsize,
        succeed: bool,
    }

    impl CountingMailer {
        fn succeeding() -> Self {
            Self {
                sends: AtomicUsize::new(0),
                succeed: true,
            }
        }

        fn rejecting() -> Self {
            Self {
                sends: AtomicUsize::new(0),
                succeed: false,
            }
        }

        fn send_count(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> SendOutcome {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                SendOutcome::ok()
            } else {
                SendOutcome::failed("connection refused")
            }
        }

        async fn check(&self) -> bool {
            true
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn generate_email(
            &self,
            _template: &str,
            _recipient_data: &HashMap<String, String>,
        ) -> Result<String, LlmError> {
            Err(LlmError::Status {
                status: 500,
                body: "model not loaded".to_string(),
            })
        }

        async fn test_connection(&self) -> bool {
            false
        }

        async fn check_model_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn recipient_vars_have_reserved_keys() {
        let vars = build_recipient_vars(&contact(HashMap::new()));

        assert_eq!(vars["email"], "ana@example.com");
        assert_eq!(vars["first_name"], "Ana");
        assert_eq!(vars["last_name"], "");
    }

    #[test]
    fn custom_fields_shadow_reserved_keys() {
        let mut fields = HashMap::new();
        fields.insert("first_name".to_string(), "Dr. Ana".to_string());
        fields.insert("company".to_string(), "Acme".to_string());

        let vars = build_recipient_vars(&contact(fields));

        assert_eq!(vars["first_name"], "Dr. Ana");
        assert_eq!(vars["company"], "Acme");
        assert_eq!(vars["email"], "ana@example.com");
    }

    #[test]
    fn tally_counts_skipped_as_failed() {
        let mut tally = RunTally::default();
        tally.record(&RecipientOutcome::Sent);
        tally.record(&RecipientOutcome::Sent);
        tally.record(&RecipientOutcome::SkippedMissing);

        assert_eq!(tally.sent, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.sent + tally.failed, 3);
    }

    #[test]
    fn tally_counts_failures() {
        let mut tally = RunTally::default();
        tally.record(&RecipientOutcome::Failed("boom".to_string()));
        tally.record(&RecipientOutcome::Sent);

        assert_eq!(tally.sent, 1);
        assert_eq!(tally.failed, 1);
    }

    #[tokio::test]
    async fn missing_contact_fails_without_log_row() {
        let tpl = template(false);
        let store = MemoryStore::with(vec![], tpl.clone());
        let mailer: DynMailer = Arc::new(CountingMailer::succeeding());
        let campaign = campaign(tpl.id, vec![Uuid::new_v4()]);

        let outcome =
            process_recipient(&store, &mailer, None, &campaign, &tpl, campaign.contact_ids[0])
                .await;

        assert_eq!(outcome, RecipientOutcome::SkippedMissing);
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_skips_send_and_log() {
        let tpl = template(true);
        let recipient = contact(HashMap::new());
        let contact_id = recipient.id;
        let store = MemoryStore::with(vec![recipient], tpl.clone());

        let counting = Arc::new(CountingMailer::succeeding());
        let mailer: DynMailer = counting.clone();
        let llm: DynLlmClient = Arc::new(FailingLlm);
        let campaign = campaign(tpl.id, vec![contact_id]);

        let outcome =
            process_recipient(&store, &mailer, Some(&llm), &campaign, &tpl, contact_id).await;

        assert!(matches!(outcome, RecipientOutcome::Failed(_)));
        assert_eq!(counting.send_count(), 0);
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn failed_send_still_writes_a_failed_log_row() {
        let tpl = template(false);
        let recipient = contact(HashMap::new());
        let contact_id = recipient.id;
        let store = MemoryStore::with(vec![recipient], tpl.clone());
        let mailer: DynMailer = Arc::new(CountingMailer::rejecting());
        let campaign = campaign(tpl.id, vec![contact_id]);

        let outcome =
            process_recipient(&store, &mailer, None, &campaign, &tpl, contact_id).await;

        assert!(matches!(outcome, RecipientOutcome::Failed(_)));
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, EmailStatus::Failed);
        assert_eq!(logs[0].error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn dry_run_logs_one_sent_row_per_resolved_recipient() {
        let tpl = template(false);
        let first = contact(HashMap::new());
        let second = Contact {
            id: Uuid::new_v4(),
            email: "bo@example.com".to_string(),
            ..contact(HashMap::new())
        };
        let ids = vec![first.id, second.id];
        let store = MemoryStore::with(vec![first, second], tpl.clone());
        let campaign = campaign(tpl.id, ids.clone());

        run_to_completion(&store, &config(), campaign, true)
            .await
            .unwrap();

        let logs = store.logs();
        assert_eq!(logs.len(), 2);
        for (log, id) in logs.iter().zip(&ids) {
            assert_eq!(log.status, EmailStatus::Sent);
            assert_eq!(log.contact_id, *id);
        }
        assert_eq!(
            store.completed_tally(),
            Some(RunTally { sent: 2, failed: 0 })
        );
    }

    #[tokio::test]
    async fn run_continues_past_missing_contact_and_tally_covers_every_ref() {
        let tpl = template(false);
        let first = contact(HashMap::new());
        let last = Contact {
            id: Uuid::new_v4(),
            email: "zo@example.com".to_string(),
            ..contact(HashMap::new())
        };
        let refs = vec![first.id, Uuid::new_v4(), last.id];
        let store = MemoryStore::with(vec![first, last], tpl.clone());
        let campaign = campaign(tpl.id, refs.clone());

        run_to_completion(&store, &config(), campaign, true)
            .await
            .unwrap();

        // The dangling middle reference fails the tally but produces no row.
        assert_eq!(store.logs().len(), 2);
        let tally = store.completed_tally().unwrap();
        assert_eq!(tally.sent, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!((tally.sent + tally.failed) as usize, refs.len());
    }
}
