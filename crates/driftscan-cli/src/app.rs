use std::io::IsTerminal;
use std::sync::Arc;

use driftscan_compare::{
    compute_instance_comparer, database_instance_comparer, storage_bucket_comparer, TagMatcher,
    DEFAULT_IGNORED_TAG_PREFIX,
};
use driftscan_config::{Config, LogFormat, ReporterKind, Settings, StateBackend};
use driftscan_domain::{Reporter, Result};
use driftscan_engine::{ComponentRegistry, Engine, KindRun, RunConfig};
use driftscan_hcl::{ModuleConfig, TfHclProvider};
use driftscan_state::TfStateProvider;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::reporters::{JsonReporter, TextReporter};

/// Load configuration (file, then environment, then CLI overrides), wire
/// the components and run one analysis.
pub async fn run(cli: Cli) -> Result<()> {
    let mut raw = driftscan_config::load(&cli.config)?;
    driftscan_config::apply_env_overlay(&mut raw, std::env::vars())?;
    if let Some(level) = cli.log_level {
        raw.settings.log_level = Some(level);
    }
    if let Some(format) = cli.log_format {
        raw.settings.log_format = Some(format);
    }
    let mut config = driftscan_config::validate(raw)?;
    if let Some(spec) = &cli.attributes {
        driftscan_config::apply_attribute_overrides(&mut config, spec)?;
    }

    init_tracing(&config.settings);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling the run");
            signal_token.cancel();
        }
    });

    let engine = build_engine(&config).await?;
    engine.run(&cancel).await
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let registry = ComponentRegistry::new();

    match &config.state {
        StateBackend::Tfstate { path } => {
            registry.register_state_provider("tfstate", Arc::new(TfStateProvider::new(path)))?;
        }
        StateBackend::Tfhcl { directory, var_files, workspace } => {
            registry.register_state_provider(
                "tfhcl",
                Arc::new(TfHclProvider::new(ModuleConfig {
                    directory: directory.clone(),
                    var_files: var_files.clone(),
                    workspace: workspace.clone(),
                })),
            )?;
        }
    }
    registry.register_platform_provider(
        "aws",
        Arc::new(
            driftscan_aws::AwsPlatformProvider::connect(
                config.platform.region.clone(),
                config.platform.profile.clone(),
                config.platform.api_rps,
            )
            .await,
        ),
    )?;
    registry.register_comparer(Arc::new(compute_instance_comparer(DEFAULT_IGNORED_TAG_PREFIX)))?;
    registry.register_comparer(Arc::new(storage_bucket_comparer(DEFAULT_IGNORED_TAG_PREFIX)))?;
    registry.register_comparer(Arc::new(database_instance_comparer(DEFAULT_IGNORED_TAG_PREFIX)))?;

    let matcher = Arc::new(TagMatcher::new(config.settings.matcher_tag_key.clone())?);
    let reporter: Arc<dyn Reporter> = match config.settings.reporter {
        ReporterKind::Text => {
            let color = !config.settings.reporter_no_color && std::io::stdout().is_terminal();
            Arc::new(TextReporter::new(Box::new(std::io::stdout()), color))
        }
        ReporterKind::Json => Arc::new(JsonReporter::new(Box::new(std::io::stdout()))),
    };

    let run_config = RunConfig {
        kinds: config
            .resources
            .iter()
            .map(|resource| KindRun {
                kind: resource.kind,
                attributes: resource.attributes.clone(),
                platform_filters: resource.platform_filters.clone(),
            })
            .collect(),
        concurrency: config.settings.concurrency,
    };

    Ok(Engine::new(
        registry.state_provider(config.state.provider_name())?,
        registry.platform_provider("aws")?,
        matcher,
        reporter,
        registry.comparers(),
        run_config,
    ))
}
