use sentry::ClientInitGuard;
use sentry_tracing::{EventFilter, SentryLayer};
use tracing::Level;

/// Starts the Sentry client when `SENTRY_DSN` is configured.
///
/// The returned guard flushes pending events on drop, so `main` must hold it
/// for the lifetime of the process.
pub fn init_once() -> Option<ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    let environment = if cfg!(debug_assertions) {
        "dev"
    } else {
        "production"
    };
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(environment.into()),
            ..Default::default()
        },
    )))
}

/// Tracing layer forwarding errors as Sentry events and warnings as breadcrumbs.
pub fn sentry_layer<S>() -> SentryLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
        Level::ERROR => EventFilter::Event,
        Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        _ => EventFilter::Ignore,
    })
}
