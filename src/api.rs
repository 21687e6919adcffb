#![forbid(unsafe_code)]

use std::sync::Arc;

use poem::endpoint::StaticFileEndpoint;
use poem::{get, post, EndpointExt, Route};
use poem_openapi::OpenApiService;

use crate::completion::forwarder::{CompletionClient, Forwarder};
use crate::utils::config::{Config, SPEC_PATH, SPEC_YAML_PATH, VERSIONED_PREFIX};
use crate::utils::server_utils::get_absolute_path;

pub mod translate;
pub mod version;

use translate::TranslateState;
use version::VersionApi;

// ---------------------------------------------------------------------------
// build_app:
// ---------------------------------------------------------------------------
/** Assemble every route the server exposes.  The completion client is
 * injected so tests can substitute a double for the real provider.
 */
pub fn build_app(config: &Config, client: Arc<dyn CompletionClient>) -> Route {
    // The single translate-style endpoint and its per-process state.
    let state = Arc::new(TranslateState::new(
        Forwarder::from_config(client, config),
        config.request_property.clone(),
        config.response_property.clone(),
    ));

    // Versioned api documented through openapi.
    let server_url = format!("http://{}:{}{}", config.http_addr, config.http_port, VERSIONED_PREFIX);
    let api_service = OpenApiService::new(VersionApi, config.title.clone(), env!("CARGO_PKG_VERSION"))
        .server(server_url);
    let spec = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();

    // The landing page is served byte for byte from disk.
    let index = StaticFileEndpoint::new(get_absolute_path(&config.index_file));

    Route::new()
        .at("/", get(index))
        .at(&config.api_endpoint, post(translate::translate).data(state))
        .nest(VERSIONED_PREFIX, api_service)
        .at(SPEC_PATH, spec)
        .at(SPEC_YAML_PATH, spec_yaml)
}
