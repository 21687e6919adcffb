#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use log::info;
use poem::listener::TcpListener;

// Server Utilities
use crate::api::build_app;
use crate::completion::openai::OpenAiClient;
use crate::utils::config::{init_app_args, init_app_dirs, init_log, init_runtime_context, RuntimeCtx};
use crate::utils::errors::Errors;

// Modules
mod api;
mod completion;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "PromptServer"; // for poem logging

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    // --------------- Initialize Server --------------
    // Announce ourselves.
    println!("Starting prompt_server!");

    // Read configuration and start logging.
    let ctx = server_init()?;
    let config = &ctx.parms.config;

    // --------------- Main Loop Set Up ---------------
    // The provider client is built once and shared by all requests.
    let client = Arc::new(OpenAiClient::from_config(config, ctx.api_key.clone()));
    let app = build_app(config, client);

    let addr = format!("{}:{}", config.http_addr, config.http_port);
    info!("Serving {} on {}, api endpoint: {}", config.title, addr, config.api_endpoint);

    // ------------------ Main Loop -------------------
    poem::Server::new(TcpListener::bind(addr))
        .name(SERVER_NAME)
        .run(app)
        .await?;
    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// server_init:
// ---------------------------------------------------------------------------
/** Initialize logging and build the runtime context.  Any failure here
 * aborts startup.
 */
fn server_init() -> Result<RuntimeCtx> {
    let args = init_app_args();
    let dirs = init_app_dirs(&args);

    // Configure our log.
    init_log(&dirs)?;

    // Read and validate the configuration file.
    let ctx = init_runtime_context(&args, dirs)?;
    info!("{}", Errors::InputParms(format!("{:#?}", ctx)));

    // Log build info.
    print_version_info();
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("\n*** Running PROMPT_SERVER={}, BRANCH={}, COMMIT={}, DIRTY={}, SRC_TS={}, RUSTC={}.",
          option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
          env!("GIT_BRANCH"),
          env!("GIT_COMMIT_SHORT"),
          env!("GIT_DIRTY"),
          env!("SOURCE_TIMESTAMP"),
          env!("RUSTC_VERSION"));
}
