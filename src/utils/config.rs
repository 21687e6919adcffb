#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error, LevelFilter};
use serde::Deserialize;
use std::{env, fs, fmt};
use structopt::StructOpt;
use toml;

use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

// Server Utilities
use crate::utils::{server_utils::get_absolute_path, errors::Errors};
use crate::completion::forwarder::placeholder_count;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Directory and file locations. Unless otherwise noted, all files and directories
// are relative to the root directory.
const ENV_ROOT_DIR         : &str = "PROMPT_SERVER_ROOT_DIR";
const DEFAULT_ROOT_DIR     : &str = "~/.prompt_server";
const CONFIG_DIR           : &str = "/config";
const LOG4RS_CONFIG_FILE   : &str = "/log4rs.yml";         // relative to config dir
const APP_CONFIG_FILE      : &str = "/prompt_server.toml"; // relative to config dir

// Networking.
const DEFAULT_HTTP_ADDR    : &str = "0.0.0.0";
const DEFAULT_HTTP_PORT    : u16  = 5000;

// Endpoint and payload naming.
const DEFAULT_API_ENDPOINT      : &str = "/translate";
const DEFAULT_REQUEST_PROPERTY  : &str = "text";
const DEFAULT_RESPONSE_PROPERTY : &str = "translatedText";
const DEFAULT_INDEX_FILE        : &str = "index.html";

// Completion provider.
const DEFAULT_MODEL        : &str = "gpt-3.5-turbo";
const DEFAULT_API_BASE     : &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV  : &str = "OPENAI_API_KEY";
const DEFAULT_PLACEHOLDER  : &str = "input_text";
const DEFAULT_PROMPT_TEMPLATE: &str =
    "Translate the following text into Spanish. Reply with the translation only: {input_text}";

// Routes owned by the server itself.
pub const VERSIONED_PREFIX : &str = "/v1";
pub const SPEC_PATH        : &str = "/spec";
pub const SPEC_YAML_PATH   : &str = "/spec_yaml";

// ***************************************************************************
//                             Directory Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// AppDirs:
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct AppDirs {
    pub root_dir: String,
    pub config_dir: String,
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// AppArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Default, StructOpt)]
#[structopt(name = "prompt_server", about = "Command line arguments for the prompt server.")]
pub struct AppArgs {
    /// Specify the server's root data directory.
    ///
    /// The root directory is calculated using the following priority order:
    ///
    ///   1. If set, the value of the PROMPT_SERVER_ROOT_DIR environment,
    ///
    ///   2. Otherwise, if set, the value of the --root-dir command line argument,
    ///
    ///   3. Otherwise, ~/.prompt_server
    ///
    #[structopt(short, long)]
    pub root_dir: Option<String>,

    /// Override the http_port value of the configuration file.
    #[structopt(short, long)]
    pub port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
/** Everything main needs to assemble the server.  The context is built once at
 * startup and its pieces are handed to the endpoints that need them.
 */
pub struct RuntimeCtx {
    pub parms: Parms,
    pub api_key: Option<String>,
    pub app_dirs: AppDirs,
}

// The credential never reaches the log.
impl fmt::Debug for RuntimeCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self.api_key {
            Some(_) => "<redacted>",
            None => "<not set>",
        };
        f.debug_struct("RuntimeCtx")
            .field("parms", &self.parms)
            .field("api_key", &key)
            .field("app_dirs", &self.app_dirs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
/** The application configuration.  Every field has a default so that partial
 * toml files are accepted.
 */
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub http_addr: String,
    pub http_port: u16,
    pub api_endpoint: String,
    pub request_property: String,
    pub response_property: String,
    pub index_file: String,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub prompt_template: String,
    pub placeholder: String,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// The literal text in the template that gets replaced, ex: {input_text}.
    pub fn placeholder_token(&self) -> String {
        format!("{{{}}}", self.placeholder)
    }

    /// Reject configurations that would either break routing or produce
    /// prompts that never contain the caller's text.
    pub fn validate(&self) -> Result<(), Errors> {
        if self.placeholder.is_empty() {
            return Err(Errors::InvalidConfig("placeholder must not be empty".to_string()));
        }
        if placeholder_count(&self.prompt_template, &self.placeholder_token()) == 0 {
            return Err(Errors::InvalidConfig(format!(
                "prompt_template does not contain the placeholder {}", self.placeholder_token())));
        }
        if self.request_property.is_empty() || self.response_property.is_empty() {
            return Err(Errors::InvalidConfig(
                "request_property and response_property must not be empty".to_string()));
        }
        if !self.api_endpoint.starts_with('/') || self.api_endpoint == "/" {
            return Err(Errors::InvalidConfig(format!(
                "api_endpoint must be an absolute path other than /: {}", self.api_endpoint)));
        }
        if self.api_endpoint == SPEC_PATH || self.api_endpoint == SPEC_YAML_PATH ||
           self.api_endpoint == VERSIONED_PREFIX ||
           self.api_endpoint.starts_with(&(VERSIONED_PREFIX.to_string() + "/")) {
            return Err(Errors::InvalidConfig(format!(
                "api_endpoint collides with a reserved route: {}", self.api_endpoint)));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Prompt Server".to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            request_property: DEFAULT_REQUEST_PROPERTY.to_string(),
            response_property: DEFAULT_RESPONSE_PROPERTY.to_string(),
            index_file: DEFAULT_INDEX_FILE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

// ***************************************************************************
//                            Directory Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_app_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
pub fn init_app_args() -> AppArgs {
    let args = AppArgs::from_args();
    println!("{:?}", args);
    args
}

// ---------------------------------------------------------------------------
// init_app_dirs:
// ---------------------------------------------------------------------------
/** Calculate the external data directories.  Nothing is created here, a
 * missing config directory simply means all defaults are used.
 */
pub fn init_app_dirs(args: &AppArgs) -> AppDirs {
    let root_dir = resolve_root_dir(env::var(ENV_ROOT_DIR).ok(), args.root_dir.clone());
    let config_dir = root_dir.clone() + CONFIG_DIR;
    AppDirs { root_dir, config_dir }
}

// ---------------------------------------------------------------------------
// resolve_root_dir:
// ---------------------------------------------------------------------------
fn resolve_root_dir(env_dir: Option<String>, arg_dir: Option<String>) -> String {
    // Order of precedence:
    //  1. Environment variable
    //  2. Command line --root-dir argument
    //  3. Default location
    //
    let root_dir = env_dir
        .or(arg_dir)
        .unwrap_or_else(|| DEFAULT_ROOT_DIR.to_string());

    // Canonicalize the path.
    get_absolute_path(&root_dir)
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the config directory's log4rs.yml.  When that file
 * doesn't exist we fall back to an info level console logger.
 */
pub fn init_log(dirs: &AppDirs) -> Result<()> {
    let logconfig = dirs.config_dir.clone() + LOG4RS_CONFIG_FILE;
    if std::path::Path::new(&logconfig).is_file() {
        if let Err(e) = log4rs::init_file(&logconfig, Default::default()) {
            println!("{}", e);
            return Err(anyhow!(Errors::Log4rsInitialization(logconfig)));
        }
        info!("Log4rs initialized using: {}", logconfig);
    } else {
        log4rs::init_config(default_log_config()?)?;
        info!("Log4rs initialized with console defaults, {} not found.", logconfig);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// default_log_config:
// ---------------------------------------------------------------------------
fn default_log_config() -> Result<LogConfig> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l})} {M} - {m}{n}")))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    Ok(config)
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from the configuration file in the
 * config directory.  If the file cannot be read the default values are used.
 */
fn get_parms(dirs: &AppDirs) -> Result<Parms> {
    // Get the config file path from its data directory.
    let config_file_abs = get_absolute_path(&(dirs.config_dir.clone() + APP_CONFIG_FILE));

    // Read the cofiguration file.
    info!("{}", Errors::ReadingConfigFile(config_file_abs.clone()));
    let contents = match fs::read_to_string(&config_file_abs) {
        Ok(c) => c,
        Err(_) => {
            info!("Unable to read configuration at {}. Using default values.", config_file_abs);
            return Ok(Parms { config_file: Default::default(), config: Config::new() });
        }
    };

    let config = parse_config(&contents, &config_file_abs)?;
    Ok(Parms { config_file: config_file_abs, config })
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(contents: &str, config_file: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            Result::Err(anyhow!(msg))
        }
    }
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
/** Read and validate the configuration, apply command line overrides and
 * pick up the provider credential from the environment.  An absent credential
 * is not an error here; the provider will reject the call later.
 */
pub fn init_runtime_context(args: &AppArgs, app_dirs: AppDirs) -> Result<RuntimeCtx> {
    let mut parms = get_parms(&app_dirs)?;
    if let Some(port) = args.port {
        parms.config.http_port = port;
    }
    parms.config.validate()?;

    let api_key = env::var(&parms.config.api_key_env).ok();
    if api_key.is_none() {
        info!("Environment variable {} is not set, completion calls will be unauthenticated.",
              parms.config.api_key_env);
    }

    Ok(RuntimeCtx { parms, api_key, app_dirs })
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_config() {
        println!("{:?}", Config::new());
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.placeholder_token(), "{input_text}");
        assert_eq!(config.api_endpoint, "/translate");
        assert_eq!(config.request_property, "text");
        assert_eq!(config.response_property, "translatedText");
        assert_eq!(config.http_port, 5000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            http_port = 8080
            model = "gpt-4o-mini"
            prompt_template = "Summarize: {text_in}"
            placeholder = "text_in"
        "#;
        let config = parse_config(toml, "test.toml").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
        assert_eq!(config.api_key_env, DEFAULT_API_KEY_ENV);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_toml_is_rejected() {
        assert!(parse_config("http_port = \"not a number\"", "test.toml").is_err());
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        for template in ["no slot here", "escaped {{input_text}} only"] {
            let config = Config { prompt_template: template.to_string(), ..Config::new() };
            assert!(matches!(config.validate(), Err(Errors::InvalidConfig(_))), "{}", template);
        }
    }

    #[test]
    fn reserved_endpoints_are_rejected() {
        for endpoint in ["/", "translate", "/spec", "/spec_yaml", "/v1", "/v1/translate"] {
            let config = Config { api_endpoint: endpoint.to_string(), ..Config::new() };
            assert!(config.validate().is_err(), "accepted {}", endpoint);
        }
        let config = Config { api_endpoint: "/v1translate".to_string(), ..Config::new() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn root_dir_precedence() {
        let env_dir = Some("/tmp/from_env".to_string());
        let arg_dir = Some("/tmp/from_arg".to_string());
        assert_eq!(resolve_root_dir(env_dir, arg_dir.clone()), "/tmp/from_env");
        assert_eq!(resolve_root_dir(None, arg_dir), "/tmp/from_arg");
        assert!(resolve_root_dir(None, None).ends_with(".prompt_server"));
    }

    #[test]
    fn runtime_ctx_debug_redacts_key() {
        let ctx = RuntimeCtx {
            parms: Parms { config_file: String::new(), config: Config::new() },
            api_key: Some("sk-secret".to_string()),
            app_dirs: AppDirs { root_dir: "/r".to_string(), config_dir: "/r/config".to_string() },
        };
        let s = format!("{:?}", ctx);
        assert!(!s.contains("sk-secret"));
        assert!(s.contains("<redacted>"));
    }
}
