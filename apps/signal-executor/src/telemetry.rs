//! Tracing Setup
//!
//! Console logging through `tracing-subscriber`, optionally exporting spans
//! over OTLP.
//!
//! # Configuration
//!
//! - `RUST_LOG`: Filter directives (default: `observability.logging.level`)
//! - `OTEL_ENABLED`: Set to `true` to export spans over OTLP
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: `http://localhost:4317`)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: `signal-executor`)
//!
//! # Usage
//!
//! ```rust,ignore
//! use signal_executor::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(&config.observability.logging);
//!     // ... application code
//! }
//! ```

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Guard that shuts down the tracer provider on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported over OTLP.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Error shutting down tracer provider: {e:?}");
        }
    }
}

/// Filter from `RUST_LOG`, falling back to the configured level.
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build the OTLP tracer provider when `OTEL_ENABLED=true`.
fn otel_provider() -> Option<(SdkTracerProvider, String, String)> {
    let otel_enabled = std::env::var("OTEL_ENABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if !otel_enabled {
        return None;
    }

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "signal-executor".to_string());

    match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
    {
        Ok(exporter) => {
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .build();
            Some((provider, service_name, endpoint))
        }
        Err(e) => {
            eprintln!("Failed to create OTLP exporter: {e:?}, falling back to console logging");
            None
        }
    }
}

/// Initialize tracing.
///
/// Returns a guard that will shut down the tracer provider when dropped.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
#[must_use]
pub fn init_telemetry(logging: &LoggingConfig) -> TelemetryGuard {
    let compact = logging.format.eq_ignore_ascii_case("compact");
    let (compact_layer, full_layer) = if compact {
        (Some(tracing_subscriber::fmt::layer().compact()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    let otel = otel_provider();
    let otel_layer = otel.as_ref().map(|(provider, service_name, _)| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.clone()))
    });

    Registry::default()
        .with(env_filter(logging))
        .with(compact_layer)
        .with(full_layer)
        .with(otel_layer)
        .init();

    match otel {
        Some((provider, service_name, endpoint)) => {
            tracing::info!(
                service_name = %service_name,
                endpoint = %endpoint,
                "OpenTelemetry initialized"
            );
            TelemetryGuard {
                provider: Some(provider),
            }
        }
        None => {
            tracing::info!("OpenTelemetry disabled, using console logging only");
            TelemetryGuard { provider: None }
        }
    }
}
