use std::sync::Arc;

use secrecy::SecretString;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use mail_triage::audit::AuditLogger;
use mail_triage::classify::{LlmClassifier, LlmReplyGenerator};
use mail_triage::config::{AppConfig, MailboxConfig};
use mail_triage::cost::CostTracker;
use mail_triage::llm::create_provider;
use mail_triage::pipeline::{
    ActionDispatcher, MessageProcessor, RuleEngine, SafetyGate, ThreadResolver,
};
use mail_triage::transport::imap::ImapMailbox;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config_path =
        std::env::var("MAIL_TRIAGE_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = AppConfig::load(&config_path)?;

    // Console + daily log file; the guard must outlive the run.
    let file_appender = tracing_appender::rolling::daily(&config.logging.log_dir, "mail-triage.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    let api_key = std::env::var("LLM_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: LLM_API_KEY not set");
        eprintln!("  export LLM_API_KEY=sk-...");
        std::process::exit(1);
    });

    let mailbox_config = MailboxConfig::from_env()?;
    let rules = RuleEngine::new(config.rules.clone());

    eprintln!("📧 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {config_path}");
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   IMAP: {}  SMTP: {}", mailbox_config.imap_host, mailbox_config.smtp_host);
    eprintln!("   Rules: {}", rules.rule_count());
    if config.safety.dry_run {
        eprintln!("   Mode: DRY RUN (no action will touch the mailbox)\n");
    } else {
        eprintln!(
            "   Mode: live (threshold {:.2}, max {} sends/hour)\n",
            config.safety.confidence_threshold, config.safety.max_sends_per_hour
        );
    }

    // ── Collaborators ───────────────────────────────────────────────
    let costs = Arc::new(CostTracker::new());
    let provider = create_provider(&config.llm, SecretString::from(api_key));
    let classifier = Arc::new(LlmClassifier::new(Arc::clone(&provider), Arc::clone(&costs)));
    let generator = Arc::new(LlmReplyGenerator::new(provider, Arc::clone(&costs)));

    let mailbox = Arc::new(ImapMailbox::new(
        mailbox_config,
        config.processing.mailbox.clone(),
    ));
    let safety = Arc::new(SafetyGate::new(config.safety.clone()));
    let audit = AuditLogger::new(&config.logging)?;

    let processor = MessageProcessor::new(
        ThreadResolver::new(mailbox.clone()),
        classifier,
        rules,
        Arc::clone(&safety),
        ActionDispatcher::new(
            mailbox.clone(),
            generator,
            Arc::clone(&safety),
            config.templates.clone(),
            config.safety.dry_run,
        ),
        config.processing.effective_thread_depth(),
    );

    // ── Run ─────────────────────────────────────────────────────────
    let run_id = Uuid::new_v4();
    tracing::info!(run_id = %run_id, "Starting triage run");

    let messages = mailbox
        .fetch_unread(config.processing.max_messages_per_run)
        .await?;
    if messages.is_empty() {
        tracing::info!("No unread messages");
    }

    let records = processor.process_batch(messages).await;
    for record in &records {
        audit.log_record(record);
    }
    audit.log_summary(run_id, &records, config.safety.dry_run);

    let cost = costs.summary();
    tracing::info!(
        calls = cost.total_calls,
        tokens = cost.total_tokens,
        total_cost = %cost.total_cost,
        "LLM usage"
    );

    let status = safety.status();
    tracing::info!(
        sends_this_hour = status.sends_this_hour,
        sends_remaining = status.sends_remaining,
        "Safety status"
    );

    Ok(())
}
