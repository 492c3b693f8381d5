use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use nw_cli::cli::{self, Cli, Command, ConfigCommand};
use nw_domain::config::ObservabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("nodewire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config()?;
            cli::config::show(&config)
        }
        Command::RuntimeVersion { url } => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::node::runtime_version(&config, url).await
        }
        Command::Call { method, params, url } => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::node::call(&config, method, &params, url).await
        }
        Command::Sync => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::runtime::sync(&config).await
        }
        Command::ResetRuntime => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::runtime::reset(&config).await
        }
        Command::Decode { type_name, hex } => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::runtime::decode(&config, &type_name, &hex).await
        }
        Command::Constant { module, name } => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::runtime::constant(&config, &module, &name).await
        }
        Command::Watch => {
            let (config, _) = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result = cli::watch::run(&config).await;
            shutdown_tracing(tracer_provider);
            result
        }
        Command::Listen { last_event_id } => {
            let (config, _) = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result = cli::listen::run(&config, last_event_id).await;
            shutdown_tracing(tracer_provider);
            result
        }
    }
}

/// Structured JSON tracing for the long-running commands.
///
/// When `otlp_endpoint` is configured, an OpenTelemetry layer is added
/// so every `tracing` span is also exported via OTLP/gRPC.  The returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nw_rpc=debug,nw_sse=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let Some(endpoint) = obs.export_endpoint() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!("WARNING: failed to create OTLP exporter for {endpoint}: {e}; continuing without OpenTelemetry");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(obs.sample_rate))
        .with_resource(resource)
        .build();

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("nodewire"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

fn shutdown_tracing(provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
}

/// Compact stderr-only tracing for one-shot commands, so stdout stays
/// clean for their output.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
