use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{SERVICE_NAME, SERVICE_VERSION},
    resource::DEPLOYMENT_ENVIRONMENT_NAME,
};
use rocket::{
    Data, Request, Response,
    fairing::{Fairing, Info, Kind},
};
use std::time::Instant;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing::{Span, field::Empty, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub struct TelemetryFairing;

#[rocket::async_trait]
impl Fairing for TelemetryFairing {
    fn info(&self) -> Info {
        Info {
            name: "Request tracing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let method = request.method().to_string();
        let uri = request.uri().path().to_string();

        let span = info_span!(
            "http_request",
            otel.name = format!("{} {}", method, uri),
            http.method = %method,
            http.uri = %uri,
            http.route = Empty,
            http.status_code = Empty,
            http.duration_ms = Empty,
            error = Empty,
            "error.type" = Empty,
            "error.message" = Empty,
            otel.status_code = Empty,
        );

        request.local_cache(|| (span, Instant::now()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let (span, started) = request.local_cache(|| (Span::none(), Instant::now()));
        let elapsed = started.elapsed();
        let status = response.status().code;

        if let Some(route) = request.route() {
            span.record("http.route", tracing::field::display(&route.uri));
        }
        span.record("http.status_code", status);
        span.record("http.duration_ms", elapsed.as_millis() as i64);

        let _entered = span.enter();
        info!(
            method = %request.method(),
            status,
            duration_ms = elapsed.as_millis() as u64,
            "Completed request"
        );
    }
}

fn resource() -> Resource {
    let environment =
        std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

    Resource::builder()
        .with_schema_url(
            [
                KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, environment),
            ],
            SCHEMA_URL,
        )
        .build()
}

/// `name=value` from `OTEL_EXPORTER_OTLP_AUTH_HEADER`, sent as gRPC metadata.
fn auth_metadata() -> MetadataMap {
    let mut metadata = MetadataMap::new();
    let Ok(raw) = std::env::var("OTEL_EXPORTER_OTLP_AUTH_HEADER") else {
        return metadata;
    };

    let parsed = raw.split_once('=').and_then(|(name, value)| {
        let key = MetadataKey::from_bytes(name.trim().as_bytes()).ok()?;
        let value = MetadataValue::try_from(value.trim()).ok()?;
        Some((key, value))
    });
    match parsed {
        Some((key, value)) => {
            metadata.insert(key, value);
        }
        None => eprintln!("Ignoring malformed OTEL_EXPORTER_OTLP_AUTH_HEADER"),
    }
    metadata
}

fn init_tracer_provider(endpoint: &str) -> Option<SdkTracerProvider> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc)
        .with_metadata(auth_metadata());
    if endpoint.starts_with("https://") {
        builder = builder.with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots());
    }

    let exporter = match builder.build() {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Span export disabled, exporter failed to build: {}", e);
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(exporter)
            .build(),
    )
}

/// Flushes and shuts the span exporter down when dropped.
pub struct OtelGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl OtelGuard {
    pub fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    pub fn shutdown(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {:?}", err);
            }
        }
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Installs the global subscriber: env filter (default `info`), fmt output,
/// and OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init_telemetry() -> OtelGuard {
    let tracer_provider = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|endpoint| !endpoint.trim().is_empty())
        .and_then(|endpoint| init_tracer_provider(endpoint.trim()));

    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| OpenTelemetryLayer::new(provider.tracer(env!("CARGO_PKG_NAME"))));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init();
    if installed.is_err() {
        warn!("A tracing subscriber was already installed");
    }

    OtelGuard { tracer_provider }
}
