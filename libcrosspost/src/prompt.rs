//! Interactive credential prompting
//!
//! The resolver and the setup flow never talk to the terminal directly; they
//! go through [`CredentialPrompt`], so tests can script the answers.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use secrecy::SecretString;
use zeroize::Zeroize;

/// What the user answered when asked for a secret
#[derive(Debug)]
pub enum PromptResponse {
    Secret(SecretString),
    /// Nothing entered, or no terminal to ask on
    Empty,
    /// Ctrl+C
    Interrupted,
}

/// Capability for asking the user for a secret
pub trait CredentialPrompt {
    /// Ask for a secret, with input hidden
    fn ask_secret(&self, label: &str) -> PromptResponse;

    /// Ask a yes/no question; non-interactive prompts take the default
    fn confirm(&self, _question: &str, default: bool) -> bool {
        default
    }

    /// A secret typed at this prompt was saved to `location`
    fn saved(&self, _location: &str) {}

    /// A secret typed at this prompt could not be saved to `location`
    fn save_failed(&self, _location: &str, _reason: &str) {}
}

/// Process-wide SIGINT handling for prompts
///
/// Installed on first use and never removed. Outside a prompt SIGINT keeps
/// its default action; while a prompt is open it only sets `interrupted`.
struct SigintGuard {
    not_prompting: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl SigintGuard {
    fn global() -> Option<&'static SigintGuard> {
        static GUARD: OnceLock<Option<SigintGuard>> = OnceLock::new();

        GUARD
            .get_or_init(|| match SigintGuard::install() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::debug!("Could not install SIGINT handler for prompts: {}", e);
                    None
                }
            })
            .as_ref()
    }

    fn install() -> std::io::Result<Self> {
        use signal_hook::consts::SIGINT;

        let not_prompting = Arc::new(AtomicBool::new(true));
        let interrupted = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&not_prompting))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;

        Ok(Self {
            not_prompting,
            interrupted,
        })
    }

    fn begin_prompt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
        self.not_prompting.store(false, Ordering::SeqCst);
    }

    /// Close the prompt window; true if Ctrl+C arrived while it was open
    fn end_prompt(&self) -> bool {
        self.not_prompting.store(true, Ordering::SeqCst);
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}

/// Prompt on the controlling terminal
///
/// Input is read with echo disabled. Ctrl+C while a prompt is open is caught
/// and reported as [`PromptResponse::Interrupted`] once the line is
/// submitted, instead of terminating the process. Outside prompts Ctrl+C
/// terminates as usual.
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialPrompt for TerminalPrompt {
    fn ask_secret(&self, label: &str) -> PromptResponse {
        if !atty::is(atty::Stream::Stdin) {
            tracing::warn!("Cannot prompt for '{}': stdin is not a terminal", label);
            return PromptResponse::Empty;
        }

        let guard = SigintGuard::global();
        if let Some(guard) = guard {
            guard.begin_prompt();
        }

        let answer = rpassword::prompt_password(format!("{}: ", label));

        let interrupted = guard.map(SigintGuard::end_prompt).unwrap_or(false);

        if interrupted {
            if let Ok(mut raw) = answer {
                raw.zeroize();
            }
            println!();
            return PromptResponse::Interrupted;
        }

        match answer {
            Ok(mut raw) => {
                let trimmed = raw.trim().to_string();
                raw.zeroize();
                if trimmed.is_empty() {
                    PromptResponse::Empty
                } else {
                    PromptResponse::Secret(SecretString::from(trimmed))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => PromptResponse::Interrupted,
            Err(e) => {
                tracing::warn!("Failed to read '{}' from terminal: {}", label, e);
                PromptResponse::Empty
            }
        }
    }

    fn confirm(&self, question: &str, default: bool) -> bool {
        if !atty::is(atty::Stream::Stdin) {
            return default;
        }

        let hint = if default { "[Y/n]" } else { "[y/N]" };
        print!("{} {} ", question, hint);
        if std::io::stdout().flush().is_err() {
            return default;
        }

        let mut input = String::new();
        if std::io::stdin().lock().read_line(&mut input).is_err() {
            return default;
        }

        match input.trim().to_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        }
    }

    fn saved(&self, location: &str) {
        println!("✅ Saved to {}", location);
    }

    fn save_failed(&self, location: &str, reason: &str) {
        eprintln!("❌ Failed to save to {}: {}", location, reason);
    }
}

/// Prompt that replays canned answers
///
/// Used by tests and by non-interactive callers. Once the script runs out
/// every question answers [`PromptResponse::Empty`].
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<PromptResponse>>,
    confirmations: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret: &str) -> Self {
        self.push(PromptResponse::Secret(SecretString::from(secret.to_string())))
    }

    pub fn with_empty(self) -> Self {
        self.push(PromptResponse::Empty)
    }

    pub fn with_interrupt(self) -> Self {
        self.push(PromptResponse::Interrupted)
    }

    pub fn with_confirmation(self, answer: bool) -> Self {
        if let Ok(mut confirmations) = self.confirmations.lock() {
            confirmations.push_back(answer);
        }
        self
    }

    fn push(self, response: PromptResponse) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(response);
        }
        self
    }

    /// Labels of every secret prompt shown so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn ask_count(&self) -> usize {
        self.asked().len()
    }

    /// Save notices shown so far, as `saved: ...` or `save failed: ...`
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    fn notify(&self, notice: String) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

impl CredentialPrompt for ScriptedPrompt {
    fn ask_secret(&self, label: &str) -> PromptResponse {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(label.to_string());
        }

        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(PromptResponse::Empty)
    }

    fn confirm(&self, _question: &str, default: bool) -> bool {
        self.confirmations
            .lock()
            .ok()
            .and_then(|mut confirmations| confirmations.pop_front())
            .unwrap_or(default)
    }

    fn saved(&self, location: &str) {
        self.notify(format!("saved: {}", location));
    }

    fn save_failed(&self, location: &str, reason: &str) {
        self.notify(format!("save failed: {}: {}", location, reason));
    }
}
