#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::utils::config::Config;

// ***************************************************************************
//                                  Errors
// ***************************************************************************
/// The two ways a forwarded request can fail.  Handlers map both to a 500
/// without knowing which provider produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The provider rejected or failed the call (auth, quota, bad request,
    /// transport failure).
    #[error("OpenAI API error: {}", .0)]
    ProviderFailure(String),

    /// Anything else, typically a response we could not interpret.
    #[error("Unexpected error: {}", .0)]
    UnexpectedFailure(String),
}

// ***************************************************************************
//                                  Traits
// ***************************************************************************
/// A completion provider.  Implementations send exactly one request per call
/// and return the untrimmed content of the first choice.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ForwardError>;
}

// ***************************************************************************
//                                Forwarder
// ***************************************************************************
/** Turns caller text into a prompt, sends it to the injected completion
 * client and returns the trimmed result.  The forwarder keeps no state
 * between calls.
 */
pub struct Forwarder {
    client: Arc<dyn CompletionClient>,
    template: String,
    placeholder_token: String,
}

impl Forwarder {
    pub fn new(client: Arc<dyn CompletionClient>, template: String, placeholder_token: String) -> Self {
        Self { client, template, placeholder_token }
    }

    pub fn from_config(client: Arc<dyn CompletionClient>, config: &Config) -> Self {
        Self::new(client, config.prompt_template.clone(), config.placeholder_token())
    }

    /// Build the prompt for this text.
    pub fn prompt_for(&self, text: &str) -> String {
        build_prompt(&self.template, &self.placeholder_token, text)
    }

    /// Single attempt, no retry.
    pub async fn forward(&self, text: &str) -> Result<String, ForwardError> {
        let prompt = self.prompt_for(text);
        debug!("Forwarding prompt of {} bytes.", prompt.len());
        let content = self.client.complete(&prompt).await?;
        Ok(content.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// build_prompt:
// ---------------------------------------------------------------------------
/** Substitute text for the placeholder.  In the template itself {{ and }}
 * stand for literal braces, so a template can ask for json output.  The
 * inserted text is never rescanned or unescaped.
 */
pub fn build_prompt(template: &str, placeholder_token: &str, text: &str) -> String {
    let mut prompt = String::with_capacity(template.len() + text.len());
    scan_template(template, placeholder_token, |piece| match piece {
        TemplatePiece::Literal(s) => prompt.push_str(s),
        TemplatePiece::Slot => prompt.push_str(text),
    });
    prompt
}

// ---------------------------------------------------------------------------
// placeholder_count:
// ---------------------------------------------------------------------------
/** Number of real substitution points, escaped {{placeholder}} excluded. */
pub fn placeholder_count(template: &str, placeholder_token: &str) -> usize {
    let mut count = 0;
    scan_template(template, placeholder_token, |piece| {
        if let TemplatePiece::Slot = piece {
            count += 1;
        }
    });
    count
}

enum TemplatePiece<'a> {
    Literal(&'a str),
    Slot,
}

// Walk the template left to right; escapes win over the placeholder so that
// {{input_text}} is the literal text {input_text}.
fn scan_template<'a>(template: &'a str, placeholder_token: &str, mut emit: impl FnMut(TemplatePiece<'a>)) {
    let mut rest = template;
    while !rest.is_empty() {
        if rest.starts_with("{{") {
            emit(TemplatePiece::Literal("{"));
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            emit(TemplatePiece::Literal("}"));
            rest = &rest[2..];
        } else if !placeholder_token.is_empty() && rest.starts_with(placeholder_token) {
            emit(TemplatePiece::Slot);
            rest = &rest[placeholder_token.len()..];
        } else {
            // Copy up to the next brace in one piece.
            let first = rest.chars().next().map_or(1, char::len_utf8);
            let next = rest[first..].find(['{', '}']).map_or(rest.len(), |i| i + first);
            emit(TemplatePiece::Literal(&rest[..next]));
            rest = &rest[next..];
        }
    }
}
