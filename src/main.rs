// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Main entry point for the PolicyShield server

use anyhow::Context;
use clap::Parser;
use policyshield::approval::{
    ApprovalBackend, ApprovalConfig, InMemoryApprovalBackend, WebhookApprovalBackend,
};
use policyshield::config::Config;
use policyshield::engine::matcher::CompiledRuleSet;
use policyshield::engine::shield::ShieldEngine;
use policyshield::engine_core::constants::defaults;
use policyshield::engine_core::models::{Mode, RuleSetSource};
use policyshield::engine_core::trace::TraceRecorder;
use policyshield::server::{create_router, AppState};
use policyshield::utils::loader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "policyshield-server",
    version,
    about = "Runtime policy enforcement for AI agent tool calls"
)]
struct Cli {
    /// Rule file (YAML); overrides POLICYSHIELD_RULES_PATH
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Bind address; overrides POLICYSHIELD_BIND
    #[arg(long)]
    bind: Option<String>,
    /// Port; overrides POLICYSHIELD_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Trace file (JSONL); overrides POLICYSHIELD_TRACE_PATH
    #[arg(long)]
    trace_file: Option<PathBuf>,
    /// Mode override: enforce, audit, disabled
    #[arg(long)]
    mode: Option<String>,
    /// Print the policy summary and exit
    #[arg(long)]
    print_summary: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("configuration")?;
    if let Some(rules) = cli.rules {
        config.rules_path = Some(rules);
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(trace_file) = cli.trace_file {
        config.trace_path = Some(trace_file);
    }
    if let Some(mode) = cli.mode {
        config.mode_override = Some(Mode::parse_safe(&mode));
    }

    init_tracing(&config)?;

    let source = match &config.rules_path {
        Some(path) => loader::load_rule_file(path)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => {
            warn!("no rule file configured; starting with an empty permissive set");
            RuleSetSource::default()
        }
    };
    let ruleset = CompiledRuleSet::compile(&source, config.mode_override).context("compiling rules")?;

    if cli.print_summary {
        println!("{}", ruleset.summary());
        return Ok(());
    }

    let approval_config = ApprovalConfig {
        timeout: config.approval_timeout,
        ttl: config.approval_ttl,
        auto_verdict: ruleset.approval_auto_verdict,
        max_entries: defaults::MAX_APPROVALS,
    };
    let approvals: Arc<dyn ApprovalBackend> = match &config.approval_webhook_url {
        Some(url) => {
            let backend = WebhookApprovalBackend::new(url.clone(), approval_config);
            backend.start_gc();
            info!(%url, "webhook approval backend enabled");
            Arc::new(backend)
        }
        None => {
            let backend = InMemoryApprovalBackend::new(approval_config);
            backend.start_gc();
            Arc::new(backend)
        }
    };

    let trace = TraceRecorder::open(config.trace_path.as_deref()).context("opening trace file")?;
    let config = Arc::new(config);
    let engine = Arc::new(ShieldEngine::new(
        Arc::clone(&config),
        ruleset,
        approvals,
        trace,
    ));
    let state = AppState::new(Arc::clone(&engine), Arc::clone(&config)).context("server state")?;
    state.metrics.set_rules(engine.rules_count() as i64);

    let router = create_router(state.clone());
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        rules = engine.rules_count(),
        mode = engine.mode().as_str(),
        "policyshield listening"
    );

    let draining = state.drain_flag();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(draining))
        .await
        .context("server")?;

    engine.shutdown();
    info!("policyshield stopped");
    Ok(())
}

async fn shutdown_signal(draining: Arc<AtomicBool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    draining.store(true, Ordering::Release);
    info!("shutdown signal received; draining");
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
