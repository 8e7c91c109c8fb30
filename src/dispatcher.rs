use crate::buffer::{Span, Style, TerminalBuffer};
use crate::client::{AiClient, BackendFactory};
use crate::error::{Error, Result};
use crate::formatter::{extract_code_and_docs, format_for_display};
use crate::profile::{Profile, ProfileStore};
use crate::utils::{ensure_directory, normalize_path, split_command, unquote};

use futures_util::future::BoxFuture;
use std::fmt;
use std::path::Path;

pub const SAVE_CONFIRM_PROMPT: &str = "Do you want to save the code above? (y/n)> ";
pub const SAVE_FILENAME_PROMPT: &str = "Enter the name of the file you want to save?> ";

const ASK_USERNAME: &str = "Enter your username";
const ASK_PATH: &str = "Enter local storage path";
const ASK_TOKEN: &str = "Enter your replicate token";
const HINT_PATH: &str =
    "Hint: Enter the full path to the folder. Use quotes if there are spaces, e.g., \"D:\\Project Files\"";
const HINT_TOKEN: &str =
    "Hint: Copy the token from your Replicate account page. It usually starts with 'r8_...'";
const API_NOT_READY: &str = "AI API is not initialized. Please check your token and restart.";

const HELP_TEXT: &str = "\
/model, used to manage AI models (/list, /set <name>)
/unsetup_profil, used to modify the terminal profile globally
 |_ /rename_user \"new_name\", used to modify the user profile name
 |_ /change_path \"new_path\", used to change the local save path
 |_ /delete, To delete existing profile data
 |_ /exit, Used to exit the settings mode
/clear, Used to clean terminals
/activate_ai, Used to activate ai mode
 |_ /context \"file_path\", Used to attach a file to the next prompt
 |_ /exit, Used to return to basic mode";

const BANNER: &str = r"  ____                 _ _        ____  _          _ _
 / ___|_ __ __ _ _ __ (_) |_ ___ / ___|| |__   ___| | |
| |  _| '__/ _` | '_ \| | __/ _ \\___ \| '_ \ / _ \ | |
| |_| | | | (_| | | | | | ||  __/ ___) | | | |  __/ | |
 \____|_|  \__,_|_| |_|_|\__\___||____/|_| |_|\___|_|_|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    SetupUsername,
    SetupPath,
    SetupToken,
    SetupTokenOnly,
    AiMode,
    SaveConfirmation,
    SaveFilename,
    Unsetup,
    ModelManagement,
}

impl Mode {
    pub fn is_setup(self) -> bool {
        matches!(
            self,
            Mode::SetupUsername | Mode::SetupPath | Mode::SetupToken | Mode::SetupTokenOnly
        )
    }

    /// Setup steps read raw input, so their prompt label is empty.
    pub fn prompt_label(self, username: &str) -> String {
        match self {
            Mode::Default => format!("{username}> "),
            Mode::AiMode => format!("{username}/mode_ai> "),
            Mode::ModelManagement => format!("{username}/model> "),
            Mode::Unsetup => format!("{username}/unsetup_profil> "),
            Mode::SaveConfirmation => SAVE_CONFIRM_PROMPT.to_string(),
            Mode::SaveFilename => SAVE_FILENAME_PROMPT.to_string(),
            Mode::SetupUsername | Mode::SetupPath | Mode::SetupToken | Mode::SetupTokenOnly => {
                String::new()
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Default => "default",
            Mode::SetupUsername | Mode::SetupPath | Mode::SetupToken | Mode::SetupTokenOnly => {
                "setup"
            }
            Mode::AiMode => "ai",
            Mode::SaveConfirmation | Mode::SaveFilename => "save",
            Mode::Unsetup => "profile",
            Mode::ModelManagement => "model",
        };
        f.write_str(name)
    }
}

/// The reply that produced a code block, held until the user decides whether
/// to save it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSave {
    pub response: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub mode: Mode,
    pub profile: Profile,
    pub token: Option<String>,
    pub pending: Option<PendingSave>,
    pub awaiting_reply: bool,
}

/// Routes submitted lines according to the current mode and renders the
/// results into the terminal buffer.
pub struct Dispatcher {
    session: Session,
    store: ProfileStore,
    factory: Box<dyn BackendFactory>,
    client: Option<AiClient>,
}

impl Dispatcher {
    pub fn new(store: ProfileStore, factory: Box<dyn BackendFactory>, token: Option<String>) -> Self {
        Dispatcher {
            session: Session {
                mode: Mode::Default,
                profile: Profile::default(),
                token: token.filter(|t| !t.trim().is_empty()),
                pending: None,
                awaiting_reply: false,
            },
            store,
            factory,
            client: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    pub fn is_busy(&self) -> bool {
        self.session.awaiting_reply
    }

    pub fn model_name(&self) -> Option<&str> {
        self.client.as_ref().map(AiClient::model_name)
    }

    pub fn has_context(&self) -> bool {
        self.client.as_ref().is_some_and(AiClient::has_context)
    }

    pub fn boot(&mut self, buf: &mut TerminalBuffer) {
        match self.store.read() {
            None => {
                tracing::info!(path = %self.store.path().display(), "no profile, starting setup");
                self.session.profile = Profile::default();
                self.session.mode = Mode::SetupUsername;
                buf.add_raw_text(ASK_USERNAME);
            }
            Some(profile) => {
                self.session.profile = profile;
                if self.session.token.is_none() {
                    self.session.mode = Mode::SetupTokenOnly;
                    ask_token(buf);
                } else {
                    self.session.mode = Mode::Default;
                    self.start_client(buf);
                }
            }
        }
    }

    /// Handles one submitted line. Returns the pending AI reply when the line
    /// was a prompt; the caller feeds the result back through
    /// [`Dispatcher::apply_ai_response`].
    pub fn handle_command(
        &mut self,
        line: &str,
        buf: &mut TerminalBuffer,
    ) -> Option<BoxFuture<'static, String>> {
        if self.session.awaiting_reply {
            buf.add_error("Please wait for the current reply to finish.", true);
            return None;
        }

        let mode = self.session.mode;
        tracing::debug!(%mode, "dispatching command");

        if mode.is_setup() {
            self.handle_setup(line, buf);
            return None;
        }

        match mode {
            Mode::AiMode => return self.handle_ai(line, buf),
            Mode::SaveConfirmation => self.handle_save_confirmation(line, buf),
            Mode::SaveFilename => self.handle_save_filename(line, buf),
            Mode::Unsetup => self.handle_unsetup(line, buf),
            Mode::ModelManagement => self.handle_model_management(line, buf),
            _ => self.handle_default(line, buf),
        }
        None
    }

    /// Renders a finished AI reply and moves to the save workflow when it
    /// carries a code block.
    pub fn apply_ai_response(&mut self, raw: String, buf: &mut TerminalBuffer) {
        self.session.awaiting_reply = false;

        let document = format_for_display(&raw);
        let extraction = extract_code_and_docs(&raw);
        tracing::debug!(
            blocks = document.blocks.len(),
            code_cards = document.code_cards().count(),
            "rendering reply"
        );
        buf.add_styled(&document.to_spans(), false);

        if extraction.has_code() {
            tracing::debug!(extension = extraction.extension, "reply carries code");
            self.session.pending = Some(PendingSave {
                response: raw,
                code: extraction.code,
            });
            self.enter(Mode::SaveConfirmation, buf);
        } else {
            self.enter(Mode::AiMode, buf);
        }
        buf.show_prompt();
    }

    fn enter(&mut self, mode: Mode, buf: &mut TerminalBuffer) {
        if mode != self.session.mode {
            tracing::debug!(from = %self.session.mode, to = %mode, "mode change");
        }
        self.session.mode = mode;
        buf.set_prompt_label(mode.prompt_label(&self.session.profile.username));
    }

    fn connect_client(&mut self) -> Result<()> {
        let profile = &self.session.profile;
        let config = profile.active_model_config()?;
        let backend = self.factory.connect(config, self.session.token.as_deref())?;
        self.client = Some(AiClient::new(backend, profile.active_model.clone()));
        Ok(())
    }

    /// Connects the client and shows the welcome screen, or reports why the
    /// client could not be built.
    fn start_client(&mut self, buf: &mut TerminalBuffer) {
        let mode = self.session.mode;
        self.enter(mode, buf);
        match self.connect_client() {
            Ok(()) => self.show_welcome(buf),
            Err(e) => {
                tracing::warn!(error = %e, "AI client unavailable");
                self.client = None;
                buf.add_error(
                    &format!("API Initialization Error: {e}\nPlease check your profile or token."),
                    true,
                );
            }
        }
    }

    fn show_welcome(&self, buf: &mut TerminalBuffer) {
        let profile = &self.session.profile;
        buf.clear();
        buf.add_styled(
            &[
                Span::new(BANNER, Style::Banner),
                Span::plain("\n\n"),
                Span::plain(format!(
                    "Welcome to GraniteShell, {}. To find out the command, type `/help`!",
                    profile.username
                )),
                Span::plain("\n"),
                Span::new(
                    format!("Active AI Model: {}", profile.active_model),
                    Style::Accent,
                ),
            ],
            true,
        );
    }

    fn handle_setup(&mut self, line: &str, buf: &mut TerminalBuffer) {
        if let Err(e) = self.setup_step(line, buf) {
            tracing::warn!(error = %e, mode = %self.session.mode, "setup step failed");
            buf.add_error(
                &format!("An error occurred during setup: {e}\nPlease restart the application."),
                true,
            );
        }
    }

    fn setup_step(&mut self, line: &str, buf: &mut TerminalBuffer) -> Result<()> {
        match self.session.mode {
            Mode::SetupUsername => {
                self.session.profile.username = line.trim().to_string();
                self.session.mode = Mode::SetupPath;
                ask_path(buf);
            }
            Mode::SetupPath => {
                let path = normalize_path(line);
                match ensure_directory(&path) {
                    Ok(_) => {
                        self.session.profile.save_path = path;
                        self.session.mode = Mode::SetupToken;
                        ask_token(buf);
                    }
                    Err(Error::Validation(msg)) => {
                        buf.add_error(&msg, false);
                        ask_path(buf);
                    }
                    Err(e) => return Err(e),
                }
            }
            Mode::SetupToken | Mode::SetupTokenOnly => {
                let token = line.trim();
                if token.is_empty() {
                    buf.add_error("Token cannot be empty. Please try again.", false);
                    ask_token(buf);
                    return Ok(());
                }
                self.finalize_setup(token.to_string(), buf)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finalize_setup(&mut self, token: String, buf: &mut TerminalBuffer) -> Result<()> {
        self.store.write(&self.session.profile)?;
        self.session.token = Some(token);
        self.session.mode = Mode::Default;
        self.start_client(buf);
        Ok(())
    }

    fn handle_default(&mut self, line: &str, buf: &mut TerminalBuffer) {
        let cmd = line.to_lowercase();
        if !cmd.starts_with('/') {
            if self.client.is_some() {
                buf.add_output("AI mode is inactive, use ‘/activate_ai’ to start.", true);
            } else {
                buf.add_error(API_NOT_READY, true);
            }
            return;
        }

        match cmd.as_str() {
            "/clear" => {
                buf.clear();
                buf.show_prompt();
            }
            "/help" => buf.add_output(HELP_TEXT, true),
            "/model" => {
                self.enter(Mode::ModelManagement, buf);
                buf.add_output(
                    "Entered model management mode. Use /list, /set <name>, or /exit.",
                    true,
                );
            }
            "/unsetup_profil" => {
                self.enter(Mode::Unsetup, buf);
                buf.show_prompt();
            }
            "/activate_ai" => {
                if self.client.is_none() {
                    buf.add_error(API_NOT_READY, true);
                    return;
                }
                self.enter(Mode::AiMode, buf);
                buf.add_output("AI mode is enabled, use ‘/exit’ to return to basic mode.", true);
            }
            _ => buf.add_error(
                &format!("Existing commands: '{line}' not recognized by the terminal"),
                true,
            ),
        }
    }

    fn handle_model_management(&mut self, line: &str, buf: &mut TerminalBuffer) {
        let (cmd, rest) = split_command(line);
        match cmd.as_str() {
            "/list" => {
                let profile = &self.session.profile;
                let mut output = String::from("Available models:");
                for (name, config) in &profile.models {
                    output.push_str(&format!("\n - {name} ({})", config.id));
                    if *name == profile.active_model {
                        output.push_str(" [ACTIVE]");
                    }
                }
                buf.add_output(&output, true);
            }
            "/set" => {
                let Some(name) = rest.map(unquote).filter(|n| !n.is_empty()) else {
                    buf.add_error("Usage: /set <model_name>", true);
                    return;
                };
                if !self.session.profile.models.contains_key(name) {
                    buf.add_error(
                        &format!("Error: Model '{name}' not found in configuration."),
                        true,
                    );
                    return;
                }

                let mut updated = self.session.profile.clone();
                updated.active_model = name.to_string();
                if let Err(e) = self.store.write(&updated) {
                    buf.add_error(&format!("Failed to save the active model. {e}"), true);
                    return;
                }
                self.session.profile = updated;

                let changed = format!("Model changed to '{name}'. Re-initializing API...");
                match self.connect_client() {
                    Ok(()) => buf.add_styled(
                        &[
                            Span::plain(changed),
                            Span::plain("\n"),
                            Span::new(format!("Active AI Model: {name}"), Style::Accent),
                        ],
                        true,
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, model = name, "AI client unavailable");
                        self.client = None;
                        buf.add_output(&changed, false);
                        buf.add_error(
                            &format!(
                                "API Initialization Error: {e}\nPlease check your profile or token."
                            ),
                            true,
                        );
                    }
                }
            }
            "/exit" => {
                self.enter(Mode::Default, buf);
                buf.show_prompt();
            }
            _ => buf.add_error(
                "Unknown command in model management. Use /list, /set, or /exit.",
                true,
            ),
        }
    }

    fn handle_ai(
        &mut self,
        line: &str,
        buf: &mut TerminalBuffer,
    ) -> Option<BoxFuture<'static, String>> {
        if self.client.is_none() {
            buf.add_error(API_NOT_READY, true);
            return None;
        }

        let (cmd, rest) = split_command(line);
        match cmd.as_str() {
            "/exit" => {
                self.enter(Mode::Default, buf);
                buf.add_output("AI mode has been disabled.", true);
            }
            "/path" => buf.show_prompt(),
            "/context" => self.load_context(rest, buf),
            c if c.starts_with('/') => buf.add_error(
                &format!(
                    "You are already in AI mode and the {c} command is not available in this mode."
                ),
                true,
            ),
            _ => {
                let client = self.client.as_mut()?;
                self.session.awaiting_reply = true;
                return Some(client.send_prompt(line));
            }
        }
        None
    }

    fn load_context(&mut self, arg: Option<&str>, buf: &mut TerminalBuffer) {
        let Some(arg) = arg else {
            buf.add_error("Usage: /context \"file_path\"", true);
            return;
        };
        let path = normalize_path(arg);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                if let Some(client) = self.client.as_mut() {
                    client.set_context(content);
                }
                tracing::info!(%path, "context file loaded");
                buf.add_output(
                    &format!("Context loaded from: {path}. It will be used for your next prompt."),
                    true,
                );
            }
            Err(e) => {
                buf.add_error(&format!("Could not read context file \"{path}\": {e}"), true);
            }
        }
    }

    fn handle_save_confirmation(&mut self, line: &str, buf: &mut TerminalBuffer) {
        match line.trim().to_lowercase().as_str() {
            "y" => self.enter(Mode::SaveFilename, buf),
            "n" => {
                self.session.pending = None;
                self.enter(Mode::AiMode, buf);
            }
            _ => {
                buf.add_error("Invalid input. Please enter 'y' or 'n'.", false);
                self.enter(Mode::SaveConfirmation, buf);
            }
        }
        buf.show_prompt();
    }

    fn handle_save_filename(&mut self, line: &str, buf: &mut TerminalBuffer) {
        let name = line.trim();
        if name.is_empty() {
            buf.add_error("File name cannot be empty.", false);
            buf.show_prompt();
            return;
        }

        let pending = self.session.pending.take();
        self.enter(Mode::AiMode, buf);
        let Some(pending) = pending else {
            buf.add_error("There is no reply waiting to be saved.", true);
            return;
        };

        let extraction = extract_code_and_docs(&pending.response);
        let dir = Path::new(&self.session.profile.save_path);
        let code_path = dir.join(format!("{name}{}", extraction.extension));
        let doc_path = dir.join(format!("{name}.md"));

        let saved = self
            .store
            .write_file(&code_path, &extraction.code)
            .and_then(|_| self.store.write_file(&doc_path, &extraction.docs));
        match saved {
            Ok(()) => buf.add_output(
                &format!(
                    "Code saved to: {}\nDocumentation saved to: {}",
                    code_path.display(),
                    doc_path.display()
                ),
                true,
            ),
            Err(e) => {
                tracing::warn!(error = %e, "saving reply failed");
                buf.add_error(
                    &format!("An error occurred while saving the files. {e}"),
                    true,
                );
            }
        }
    }

    fn handle_unsetup(&mut self, line: &str, buf: &mut TerminalBuffer) {
        let (cmd, rest) = split_command(line);
        match cmd.as_str() {
            "/rename_user" => {
                let Some(new_name) = rest.map(unquote).filter(|n| !n.is_empty()) else {
                    buf.add_error("Usage: /rename_user \"new_name\"", true);
                    return;
                };
                let mut updated = self.session.profile.clone();
                updated.username = new_name.to_string();
                match self.store.write(&updated) {
                    Ok(()) => {
                        self.session.profile = updated;
                        self.enter(Mode::Default, buf);
                        buf.add_output(
                            &format!("The username has been successfully changed to '{new_name}'."),
                            true,
                        );
                    }
                    Err(e) => buf.add_error(&format!("Failed to save new username. {e}"), true),
                }
            }
            "/change_path" => {
                let Some(arg) = rest else {
                    buf.add_output(
                        &format!(
                            "Current save path: {}\nUsage: /change_path \"new_path\"",
                            self.session.profile.save_path
                        ),
                        true,
                    );
                    return;
                };
                let new_path = normalize_path(arg);
                if !Path::new(&new_path).is_dir() {
                    buf.add_error("Error: The provided path is not a valid directory.", true);
                    return;
                }
                let mut updated = self.session.profile.clone();
                updated.save_path = new_path.clone();
                match self.store.write(&updated) {
                    Ok(()) => {
                        self.session.profile = updated;
                        buf.add_output(&format!("Save path updated to: {new_path}"), true);
                    }
                    Err(e) => buf.add_error(&format!("Failed to save new path. {e}"), true),
                }
            }
            "/delete" => match self.store.delete() {
                Ok(()) => buf.add_output(
                    "Profile data successfully deleted. Please restart the application.",
                    true,
                ),
                Err(e) => buf.add_error(&format!("Failed to delete profile data. {e}"), true),
            },
            "/exit" => {
                self.enter(Mode::Default, buf);
                buf.show_prompt();
            }
            _ => buf.add_error("Unrecognized subcommand", true),
        }
    }
}

fn ask_path(buf: &mut TerminalBuffer) {
    buf.add_raw_text(ASK_PATH);
    buf.add_hint(HINT_PATH);
}

fn ask_token(buf: &mut TerminalBuffer) {
    buf.add_raw_text(ASK_TOKEN);
    buf.add_hint(HINT_TOKEN);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AiBackend;
    use crate::formatter::RESPONSE_PREFIX;
    use crate::profile::{ModelConfig, DEFAULT_MODEL_NAME};
    use futures_util::future::FutureExt;
    use std::sync::Arc;
    use tempfile::{tempdir, NamedTempFile, TempDir};

    const TEST_USER: &str = "alice";
    const TEST_TOKEN: &str = "r8_test";
    const PY_REPLY: &str = "ai_agent> Here:\n```python\nprint(1)\n```\n";

    /// Replies with a fixed text, or echoes the prompt when none is set.
    struct Scripted {
        reply: Option<String>,
    }

    impl AiBackend for Scripted {
        fn send(&self, prompt: String) -> BoxFuture<'static, String> {
            let reply = self
                .reply
                .clone()
                .unwrap_or_else(|| format!("{RESPONSE_PREFIX}{prompt}"));
            async move { reply }.boxed()
        }
    }

    struct FakeFactory {
        reply: Option<String>,
    }

    impl BackendFactory for FakeFactory {
        fn connect(
            &self,
            config: &ModelConfig,
            token: Option<&str>,
        ) -> Result<Arc<dyn AiBackend>> {
            if token.is_none() {
                return Err(Error::Config(
                    "Please set the REPLICATE_API_TOKEN environment variable.".to_string(),
                ));
            }
            if config.id.is_empty() {
                return Err(Error::Config(
                    "Model configuration is missing the 'id' field.".to_string(),
                ));
            }
            Ok(Arc::new(Scripted {
                reply: self.reply.clone(),
            }))
        }
    }

    fn profile_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("data/profil.json")
    }

    fn dispatcher(dir: &TempDir, token: Option<&str>, reply: Option<&str>) -> Dispatcher {
        Dispatcher::new(
            ProfileStore::new(profile_path(dir)),
            Box::new(FakeFactory {
                reply: reply.map(str::to_string),
            }),
            token.map(str::to_string),
        )
    }

    /// A dispatcher booted from an existing profile whose save path is `dir`.
    fn ready(dir: &TempDir, reply: Option<&str>) -> (Dispatcher, TerminalBuffer) {
        let mut profile = Profile {
            username: TEST_USER.to_string(),
            save_path: dir.path().to_string_lossy().to_string(),
            ..Profile::default()
        };
        profile
            .models
            .insert("llama".to_string(), ModelConfig::new("meta/llama-3", "prompt"));
        ProfileStore::new(profile_path(dir)).write(&profile).unwrap();

        let mut d = dispatcher(dir, Some(TEST_TOKEN), reply);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);
        assert_eq!(d.mode(), Mode::Default);
        (d, buf)
    }

    fn send(d: &mut Dispatcher, buf: &mut TerminalBuffer, line: &str) {
        assert!(d.handle_command(line, buf).is_none(), "unexpected AI call for {line:?}");
    }

    async fn ask_ai(d: &mut Dispatcher, buf: &mut TerminalBuffer, line: &str) {
        let reply = d.handle_command(line, buf).expect("AI call");
        assert!(d.is_busy());
        d.apply_ai_response(reply.await, buf);
        assert!(!d.is_busy());
    }

    #[test]
    fn test_mode_prompt_labels() {
        assert_eq!(Mode::Default.prompt_label("bob"), "bob> ");
        assert_eq!(Mode::AiMode.prompt_label("bob"), "bob/mode_ai> ");
        assert_eq!(Mode::ModelManagement.prompt_label("bob"), "bob/model> ");
        assert_eq!(Mode::Unsetup.prompt_label("bob"), "bob/unsetup_profil> ");
        assert_eq!(Mode::SaveConfirmation.prompt_label("bob"), SAVE_CONFIRM_PROMPT);
        assert_eq!(Mode::SetupPath.prompt_label("bob"), "");
        assert!(Mode::SetupTokenOnly.is_setup());
        assert!(!Mode::SaveFilename.is_setup());
    }

    #[test]
    fn test_boot_without_profile_asks_username() {
        let dir = tempdir().unwrap();
        let mut d = dispatcher(&dir, Some(TEST_TOKEN), None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);

        assert_eq!(d.mode(), Mode::SetupUsername);
        assert_eq!(buf.text(), "Enter your username: ");
        assert_eq!(buf.input_boundary(), buf.len());
        assert_eq!(buf.prompt_label(), "");
    }

    #[test]
    fn test_boot_with_profile_without_token_asks_token() {
        let dir = tempdir().unwrap();
        ProfileStore::new(profile_path(&dir))
            .write(&Profile::default())
            .unwrap();
        let mut d = dispatcher(&dir, None, None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);

        assert_eq!(d.mode(), Mode::SetupTokenOnly);
        assert!(buf.text().starts_with("Enter your replicate token: \nHint:"));
        assert_eq!(buf.protected_ranges().len(), 1);
        // the hint does not move the live input position
        assert_eq!(buf.cursor(), buf.input_boundary());
    }

    #[test]
    fn test_full_setup_flow() {
        let dir = tempdir().unwrap();
        let blocker = NamedTempFile::new_in(dir.path()).unwrap();
        let storage = dir.path().join("storage");

        let mut d = dispatcher(&dir, None, None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);

        send(&mut d, &mut buf, "ada");
        assert_eq!(d.mode(), Mode::SetupPath);
        assert_eq!(d.session().profile.username, "ada");

        send(&mut d, &mut buf, &blocker.path().to_string_lossy());
        assert_eq!(d.mode(), Mode::SetupPath);
        assert!(buf.text().contains("points to a file, not a directory."));
        assert!(buf.text().ends_with(HINT_PATH));

        send(&mut d, &mut buf, &format!("\"{}\"", storage.display()));
        assert_eq!(d.mode(), Mode::SetupToken);
        assert!(storage.is_dir());

        send(&mut d, &mut buf, "   ");
        assert_eq!(d.mode(), Mode::SetupToken);
        assert!(buf.text().contains("Token cannot be empty. Please try again."));

        send(&mut d, &mut buf, TEST_TOKEN);
        assert_eq!(d.mode(), Mode::Default);
        assert_eq!(d.session().token.as_deref(), Some(TEST_TOKEN));
        assert_eq!(d.model_name(), Some(DEFAULT_MODEL_NAME));
        assert!(buf.text().contains("Welcome to GraniteShell, ada."));
        assert!(buf.text().ends_with("ada> "));

        let saved = ProfileStore::new(profile_path(&dir)).read().unwrap();
        assert_eq!(saved.username, "ada");
        assert_eq!(saved.save_path, storage.to_string_lossy());
    }

    #[test]
    fn test_username_is_stored_trimmed() {
        let dir = tempdir().unwrap();
        let mut d = dispatcher(&dir, None, None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);
        send(&mut d, &mut buf, "  grace  ");
        assert_eq!(d.session().profile.username, "grace");
        assert_eq!(d.mode(), Mode::SetupPath);
    }

    #[test]
    fn test_empty_username_is_kept() {
        let dir = tempdir().unwrap();
        let mut d = dispatcher(&dir, None, None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);
        send(&mut d, &mut buf, "   ");
        assert_eq!(d.session().profile.username, "");
        assert_eq!(d.mode(), Mode::SetupPath);
    }

    #[test]
    fn test_setup_write_failure_keeps_state() {
        let dir = tempdir().unwrap();
        let blocker = NamedTempFile::new_in(dir.path()).unwrap();
        let mut d = Dispatcher::new(
            ProfileStore::new(blocker.path().join("profil.json")),
            Box::new(FakeFactory { reply: None }),
            None,
        );
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);
        send(&mut d, &mut buf, "ada");
        send(&mut d, &mut buf, &dir.path().to_string_lossy());
        send(&mut d, &mut buf, TEST_TOKEN);

        assert_eq!(d.mode(), Mode::SetupToken);
        assert!(d.session().token.is_none());
        assert!(buf.text().contains("An error occurred during setup:"));
        assert!(buf.text().contains("Please restart the application."));
    }

    #[test]
    fn test_missing_model_config_reports_init_error() {
        let dir = tempdir().unwrap();
        let profile = Profile {
            active_model: "ghost".to_string(),
            ..Profile::default()
        };
        ProfileStore::new(profile_path(&dir)).write(&profile).unwrap();
        let mut d = dispatcher(&dir, Some(TEST_TOKEN), None);
        let mut buf = TerminalBuffer::new("");
        d.boot(&mut buf);

        assert!(d.model_name().is_none());
        assert!(buf
            .text()
            .contains("API Initialization Error: Configuration for active model 'ghost' not found."));

        send(&mut d, &mut buf, "/activate_ai");
        assert_eq!(d.mode(), Mode::Default);
        assert!(buf.text().contains(API_NOT_READY));
    }

    #[test]
    fn test_clear_resets_buffer() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/help");
        send(&mut d, &mut buf, "/CLEAR");

        assert_eq!(buf.text(), "alice> ");
        assert!(buf.protected_ranges().is_empty());
        assert_eq!(buf.input_boundary(), buf.len());
    }

    #[test]
    fn test_unknown_and_free_text_in_default_mode() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);

        send(&mut d, &mut buf, "/Nope");
        assert!(buf
            .text()
            .contains("Existing commands: '/Nope' not recognized by the terminal"));

        send(&mut d, &mut buf, "hello");
        assert!(buf.text().contains("AI mode is inactive, use ‘/activate_ai’ to start."));
        assert_eq!(d.mode(), Mode::Default);
    }

    #[test]
    fn test_set_unknown_model() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/model");
        assert_eq!(d.mode(), Mode::ModelManagement);

        send(&mut d, &mut buf, "/set ghost");
        assert!(buf
            .text()
            .contains("Error: Model 'ghost' not found in configuration."));
        assert_eq!(d.mode(), Mode::ModelManagement);
        assert_eq!(d.session().profile.active_model, DEFAULT_MODEL_NAME);
        let saved = ProfileStore::new(profile_path(&dir)).read().unwrap();
        assert_eq!(saved.active_model, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_list_and_set_model() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/model");

        send(&mut d, &mut buf, "/list");
        assert!(buf.text().contains(
            "Available models:\n - ibm-granite (ibm-granite/granite-3.3-8b-instruct) [ACTIVE]\n - llama (meta/llama-3)\n"
        ));

        send(&mut d, &mut buf, "/set llama");
        assert_eq!(d.mode(), Mode::ModelManagement);
        assert_eq!(d.model_name(), Some("llama"));
        assert!(buf.text().contains("Model changed to 'llama'. Re-initializing API..."));
        assert!(buf.text().ends_with("alice/model> "));
        let saved = ProfileStore::new(profile_path(&dir)).read().unwrap();
        assert_eq!(saved.active_model, "llama");

        send(&mut d, &mut buf, "/set");
        assert!(buf.text().contains("Usage: /set <model_name>"));

        send(&mut d, &mut buf, "/exit");
        assert_eq!(d.mode(), Mode::Default);
        assert!(buf.text().ends_with("alice> "));
    }

    #[tokio::test]
    async fn test_ai_reply_with_code_then_save() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, Some(PY_REPLY));
        send(&mut d, &mut buf, "/activate_ai");
        assert_eq!(d.mode(), Mode::AiMode);
        assert!(buf.text().ends_with("alice/mode_ai> "));

        ask_ai(&mut d, &mut buf, "write hello world").await;
        assert_eq!(d.mode(), Mode::SaveConfirmation);
        assert_eq!(
            d.session().pending.as_ref().map(|p| p.code.as_str()),
            Some("print(1)")
        );
        assert!(buf.text().contains(" Python "));
        assert!(buf.text().ends_with(SAVE_CONFIRM_PROMPT));

        send(&mut d, &mut buf, "maybe");
        assert_eq!(d.mode(), Mode::SaveConfirmation);
        assert!(buf.text().contains("Invalid input. Please enter 'y' or 'n'."));

        send(&mut d, &mut buf, "Y");
        assert_eq!(d.mode(), Mode::SaveFilename);
        assert!(d.session().pending.is_some());
        assert!(buf.text().ends_with(SAVE_FILENAME_PROMPT));

        send(&mut d, &mut buf, "hello");
        assert_eq!(d.mode(), Mode::AiMode);
        assert!(d.session().pending.is_none());

        let code = std::fs::read_to_string(dir.path().join("hello.py")).unwrap();
        assert_eq!(code, "print(1)");
        let docs = std::fs::read_to_string(dir.path().join("hello.md")).unwrap();
        assert!(docs.contains("[See code in .py file]"));
        assert!(buf.text().contains("Code saved to: "));
        assert!(buf.text().ends_with("alice/mode_ai> "));
    }

    #[tokio::test]
    async fn test_declining_save_discards_reply() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, Some(PY_REPLY));
        send(&mut d, &mut buf, "/activate_ai");
        ask_ai(&mut d, &mut buf, "code please").await;

        send(&mut d, &mut buf, "n");
        assert_eq!(d.mode(), Mode::AiMode);
        assert!(d.session().pending.is_none());
    }

    #[tokio::test]
    async fn test_plain_reply_stays_in_ai_mode() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, Some("ai_agent> Just text."));
        send(&mut d, &mut buf, "/activate_ai");
        ask_ai(&mut d, &mut buf, "hi").await;

        assert_eq!(d.mode(), Mode::AiMode);
        assert!(d.session().pending.is_none());
        assert!(buf.text().contains("Just text."));
        assert!(buf.text().ends_with("alice/mode_ai> "));
    }

    #[tokio::test]
    async fn test_context_is_used_once() {
        let dir = tempdir().unwrap();
        let context_file = dir.path().join("notes.txt");
        std::fs::write(&context_file, "the secret is 42").unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/activate_ai");

        send(&mut d, &mut buf, &format!("/context \"{}\"", context_file.display()));
        assert!(d.has_context());

        let first = d.handle_command("what is the secret?", &mut buf).unwrap().await;
        assert!(first.contains("Based on the following file content:"));
        assert!(first.contains("the secret is 42"));
        d.apply_ai_response(first, &mut buf);
        assert!(!d.has_context());

        let second = d.handle_command("again", &mut buf).unwrap().await;
        assert_eq!(second, "ai_agent> again");
    }

    #[test]
    fn test_ai_mode_rejects_other_commands() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/activate_ai");

        send(&mut d, &mut buf, "/model");
        assert!(buf.text().contains(
            "You are already in AI mode and the /model command is not available in this mode."
        ));
        assert_eq!(d.mode(), Mode::AiMode);

        send(&mut d, &mut buf, "/path");
        assert_eq!(d.mode(), Mode::AiMode);

        send(&mut d, &mut buf, "/exit");
        assert_eq!(d.mode(), Mode::Default);
        assert!(buf.text().contains("AI mode has been disabled."));
    }

    #[test]
    fn test_busy_dispatcher_ignores_input() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/activate_ai");

        let _pending = d.handle_command("first", &mut buf).unwrap();
        assert!(d.handle_command("second", &mut buf).is_none());
        assert!(buf.text().contains("Please wait for the current reply to finish."));
        assert_eq!(d.mode(), Mode::AiMode);
    }

    #[test]
    fn test_rename_user() {
        let dir = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/unsetup_profil");
        assert!(buf.text().ends_with("alice/unsetup_profil> "));

        send(&mut d, &mut buf, "/rename_user");
        assert!(buf.text().contains("Usage: /rename_user \"new_name\""));

        send(&mut d, &mut buf, "/rename_user \"Ada L\"");
        assert_eq!(d.mode(), Mode::Default);
        assert_eq!(buf.prompt_label(), "Ada L> ");
        assert!(buf
            .text()
            .contains("The username has been successfully changed to 'Ada L'."));
        let saved = ProfileStore::new(profile_path(&dir)).read().unwrap();
        assert_eq!(saved.username, "Ada L");
    }

    #[test]
    fn test_change_path_and_delete() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        send(&mut d, &mut buf, "/unsetup_profil");

        send(&mut d, &mut buf, "/change_path \"/definitely/not/here\"");
        assert!(buf
            .text()
            .contains("Error: The provided path is not a valid directory."));

        let target = other.path().to_string_lossy().to_string();
        send(&mut d, &mut buf, &format!("/change_path \"{target}\""));
        assert_eq!(d.session().profile.save_path, target);
        assert_eq!(d.mode(), Mode::Unsetup);

        send(&mut d, &mut buf, "/bogus");
        assert!(buf.text().contains("Unrecognized subcommand"));

        send(&mut d, &mut buf, "/delete");
        assert!(!profile_path(&dir).exists());
        assert!(buf
            .text()
            .contains("Profile data successfully deleted. Please restart the application."));
    }

    #[test]
    fn test_failed_profile_writes_keep_session() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let (mut d, mut buf) = ready(&dir, None);
        let old_path = d.session().profile.save_path.clone();

        let blocker = NamedTempFile::new_in(dir.path()).unwrap();
        d.store = ProfileStore::new(blocker.path().join("profil.json"));

        send(&mut d, &mut buf, "/unsetup_profil");
        send(&mut d, &mut buf, "/rename_user bob");
        assert!(buf.text().contains("Failed to save new username."));
        assert_eq!(d.session().profile.username, TEST_USER);
        assert_eq!(d.mode(), Mode::Unsetup);

        let target = other.path().to_string_lossy().to_string();
        send(&mut d, &mut buf, &format!("/change_path \"{target}\""));
        assert!(buf.text().contains("Failed to save new path."));
        assert_eq!(d.session().profile.save_path, old_path);

        send(&mut d, &mut buf, "/exit");
        send(&mut d, &mut buf, "/model");
        send(&mut d, &mut buf, "/set llama");
        assert!(buf.text().contains("Failed to save the active model."));
        assert_eq!(d.session().profile.active_model, DEFAULT_MODEL_NAME);
        assert_eq!(d.model_name(), Some(DEFAULT_MODEL_NAME));

        let saved = ProfileStore::new(profile_path(&dir)).read().unwrap();
        assert_eq!(saved.username, TEST_USER);
        assert_eq!(saved.active_model, DEFAULT_MODEL_NAME);
    }
}
