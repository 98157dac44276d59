use crate::conf::DevAttributes;
use crate::device::Device;
use crate::errors::Error;
use crate::model::run;
use crate::session::matcher::Matcher;
use crate::transport::base::{
    self,
    Transport,
    DEFAULT_CONNECT_TIMEOUT,
};
use core::time::Duration;
use log::{
    debug,
    info,
};
use regex::bytes::Regex;

/// Command sent on a best-effort basis when the dialogue is done.
const LOGOUT_COMMAND: &[u8] = b"exit\n";

/// The dialogue phases, in the order they run. Each phase spends its own
/// timeout budget; an expired budget fails the fetch with that phase named in
/// the error's context.
#[derive(Debug, Clone, Copy)]
enum Phase {
    LoggingIn,
    PostLogin,
    Enabling,
    PagingOff,
    Commanding,
}

/// Runs the full dialogue for `dev` and returns the transport label used plus
/// the raw capture (before filters). For a "run" model the external program
/// takes the place of the conversation.
pub fn fetch_capture(dev: &Device) -> Result<(String, Vec<u8>), Error> {
    if !dev.attr.run_prog.is_empty() {
        return run::run_external(&dev.attr).map(|capture| (String::from("run"), capture));
    }

    let mut transport = base::connect(
        &dev.host_port,
        &dev.transports,
        &dev.login_user,
        DEFAULT_CONNECT_TIMEOUT,
    )?;

    let label = transport.kind().label().to_owned();

    let mut dialogue = Dialogue::new(dev)?;
    let result = dialogue.converse(transport.as_mut());

    // transport closed on every exit path
    transport.close();

    result.map(|capture| (label, capture))
}

/// One conversation with one device, parameterized entirely by the device's
/// [`DevAttributes`]. Vendors do not subclass anything; they differ only in
/// the attribute profile driving this machine.
struct Dialogue {
    attr: DevAttributes,
    dev_id: String,
    login_user: String,
    login_password: String,
    enable_password: String,
    matcher: Matcher,
    capture: Vec<u8>,
    enabled_prompt: Option<Regex>,
}

impl Dialogue {
    fn new(dev: &Device) -> Result<Self, Error> {
        let enabled_prompt = if dev.attr.enabled_prompt_pattern.is_empty() {
            // empty enabled prompt means command output runs to end-of-stream
            None
        } else {
            Some(compile(&dev.attr.enabled_prompt_pattern)?)
        };

        Ok(Self {
            attr: dev.attr.clone(),
            dev_id: dev.id.clone(),
            login_user: dev.login_user.clone(),
            login_password: dev.login_password.clone(),
            enable_password: dev.enable_password.clone(),
            matcher: Matcher::new(dev.attr.keep_control_chars),
            capture: vec![],
            enabled_prompt,
        })
    }

    fn converse(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<Vec<u8>, Error> {
        self.login(t)?;
        self.post_login(t)?;
        self.settle(t)?;
        self.elevate(t)?;
        self.paging_off(t)?;
        self.commands(t)?;
        self.logout(t);

        info!(
            "dialogue: {} captured {} bytes",
            self.dev_id,
            self.capture.len()
        );

        Ok(core::mem::take(&mut self.capture))
    }

    /// Step 2: answer the username prompt with the login user (plus the
    /// vendor's username suffix), then the password prompt. Devices that go
    /// straight to the password prompt are tolerated.
    fn login(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        if !self.attr.need_login_chat {
            return Ok(());
        }

        debug!("dialogue: {} login chat", self.dev_id);

        let username_prompt = compile(&self.attr.username_prompt_pattern)?;
        let password_prompt = compile(&self.attr.password_prompt_pattern)?;

        let hit = self
            .wait(
                t,
                &[username_prompt, password_prompt.clone()],
                Phase::LoggingIn,
            )
            .map_err(|err| err.context("login: first prompt"))?;

        if hit == 0 {
            let user = format!("{}{}", self.login_user, self.attr.username_append);
            self.send_line(t, user.as_bytes())?;

            self.wait(t, &[password_prompt], Phase::LoggingIn)
                .map_err(|err| err.context("login: password prompt"))?;
        }

        let password = self.login_password.clone();
        self.send_line(t, password.as_bytes())?;

        Ok(())
    }

    /// On models that go straight from login to commands, the shell prompt
    /// printed after authentication is still outstanding; consume it so the
    /// first command's wait pairs with the first command's output. Models with
    /// an enable or pager step get their pairing from those steps instead.
    fn settle(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        if !self.attr.need_login_chat
            || self.attr.need_enabled_mode
            || self.attr.need_paging_off
        {
            return Ok(());
        }

        let Some(enabled) = self.enabled_prompt.clone() else {
            return Ok(());
        };

        self.wait(t, &[enabled], Phase::LoggingIn)
            .map_err(|err| err.context("login: settling prompt"))?;

        Ok(())
    }

    /// Step 3: some vendors interpose a nuisance prompt after login; answer it
    /// with the configured response verbatim.
    fn post_login(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        if self.attr.post_login_prompt_pattern.is_empty() {
            return Ok(());
        }

        debug!("dialogue: {} post-login prompt", self.dev_id);

        let nuisance = compile(&self.attr.post_login_prompt_pattern)?;

        self.wait(t, &[nuisance], Phase::PostLogin)
            .map_err(|err| err.context("post-login prompt"))?;

        let response = self.attr.post_login_prompt_response.clone();
        t.set_write_deadline(self.attr.send_timeout)?;
        t.write(response.as_bytes())?;

        Ok(())
    }

    /// Step 4: reach enabled mode. Whichever of the disabled/enabled prompts
    /// appears first decides whether escalation is needed; escalation may in
    /// turn be challenged for the enable password.
    fn elevate(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        if !self.attr.need_enabled_mode {
            return Ok(());
        }

        let Some(enabled) = self.enabled_prompt.clone() else {
            return Err(Error::Dialogue(String::from(
                "model wants enabled mode but has no enabled prompt",
            )));
        };

        if self.attr.disabled_prompt_pattern.is_empty() {
            return Err(Error::Dialogue(String::from(
                "model wants enabled mode but has no disabled prompt",
            )));
        }

        let disabled = compile(&self.attr.disabled_prompt_pattern)?;

        debug!("dialogue: {} acquiring enabled mode", self.dev_id);

        let hit = self
            .wait(t, &[disabled, enabled.clone()], Phase::Enabling)
            .map_err(|err| err.context("enable: initial prompt"))?;

        if hit == 1 {
            // already enabled
            return Ok(());
        }

        let enable_command = self.attr.enable_command.clone();
        self.send_line(t, enable_command.as_bytes())?;

        if self.attr.enable_password_prompt_pattern.is_empty() {
            self.wait(t, &[enabled], Phase::Enabling)
                .map_err(|err| err.context("enable: enabled prompt"))?;

            return Ok(());
        }

        let challenge = compile(&self.attr.enable_password_prompt_pattern)?;

        let hit = self
            .wait(t, &[challenge, enabled.clone()], Phase::Enabling)
            .map_err(|err| err.context("enable: password challenge"))?;

        if hit == 0 {
            let enable_password = self.enable_password.clone();
            self.send_line(t, enable_password.as_bytes())?;

            self.wait(t, &[enabled], Phase::Enabling)
                .map_err(|err| err.context("enable: enabled prompt"))?;
        }

        Ok(())
    }

    /// Step 5: disable pagination, then consume the configured number of
    /// prompts the command produces.
    fn paging_off(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        if !self.attr.need_paging_off {
            return Ok(());
        }

        let Some(enabled) = self.enabled_prompt.clone() else {
            return Err(Error::Dialogue(String::from(
                "model wants paging off but has no enabled prompt",
            )));
        };

        debug!("dialogue: {} disabling pager", self.dev_id);

        let pager_command = self.attr.disable_pager_command.clone();
        self.send_line(t, pager_command.as_bytes())?;

        for _ in 0..=self.attr.disable_pager_extra_prompt_count {
            self.wait(t, &[enabled.clone()], Phase::PagingOff)
                .map_err(|err| err.context("paging off"))?;
        }

        Ok(())
    }

    /// Step 6: run the capture commands. Everything between a sent command and
    /// the next enabled prompt is appended to the capture (the prompt itself
    /// is not).
    fn commands(
        &mut self,
        t: &mut dyn Transport,
    ) -> Result<(), Error> {
        for i in 0..self.attr.command_list.len() {
            let command = self.attr.command_list[i].clone();

            debug!("dialogue: {} sending command '{command}'", self.dev_id);

            if !self.attr.quote_sent_commands_format.is_empty() {
                let marker = self.attr.quote_sent_commands_format.replace("%s", &command);
                self.capture.extend_from_slice(marker.as_bytes());
                self.capture.push(b'\n');
            }

            self.send_line(t, command.as_bytes())?;

            match self.enabled_prompt.clone() {
                Some(enabled) => {
                    let body = self
                        .wait_body(t, &[enabled], Phase::Commanding)
                        .map_err(|err| err.context(&format!("command '{command}'")))?;

                    self.capture.extend_from_slice(&body);
                }
                None => {
                    // no prompt to wait for: the output ends with the stream
                    let body = self
                        .matcher
                        .read_to_eof(
                            t,
                            self.attr.command_read_timeout,
                            self.attr.command_match_timeout,
                        )
                        .map_err(|err| err.context(&format!("command '{command}'")))?;

                    self.capture.extend_from_slice(&body);
                }
            }
        }

        Ok(())
    }

    /// Step 7: best-effort logout; the device closing first is fine.
    fn logout(
        &mut self,
        t: &mut dyn Transport,
    ) {
        debug!("dialogue: {} logging out", self.dev_id);

        let _ = t.set_write_deadline(self.attr.send_timeout);
        let _ = t.write(LOGOUT_COMMAND);
    }

    /// Waits for a phase prompt, discarding the pre-prompt chatter.
    fn wait(
        &mut self,
        t: &mut dyn Transport,
        patterns: &[Regex],
        phase: Phase,
    ) -> Result<usize, Error> {
        let (read_timeout, match_timeout) = self.phase_timeouts(phase);

        let hit = self
            .matcher
            .wait_for(t, patterns, read_timeout, match_timeout)?;

        Ok(hit.pattern_index)
    }

    /// Waits for a phase prompt and returns the bytes leading up to it.
    fn wait_body(
        &mut self,
        t: &mut dyn Transport,
        patterns: &[Regex],
        phase: Phase,
    ) -> Result<Vec<u8>, Error> {
        let (read_timeout, match_timeout) = self.phase_timeouts(phase);

        let hit = self
            .matcher
            .wait_for(t, patterns, read_timeout, match_timeout)?;

        Ok(hit.body)
    }

    /// The command phase runs on its own (larger) budget; every other phase
    /// shares the login-phase budget.
    const fn phase_timeouts(
        &self,
        phase: Phase,
    ) -> (Duration, Duration) {
        match phase {
            Phase::Commanding => (
                self.attr.command_read_timeout,
                self.attr.command_match_timeout,
            ),
            Phase::LoggingIn | Phase::PostLogin | Phase::Enabling | Phase::PagingOff => {
                (self.attr.read_timeout, self.attr.match_timeout)
            }
        }
    }

    /// Sends one line, appending the LF unless the model suppresses it. The
    /// line goes out in a single write so it lands in one segment.
    fn send_line(
        &mut self,
        t: &mut dyn Transport,
        text: &[u8],
    ) -> Result<(), Error> {
        t.set_write_deadline(self.attr.send_timeout)?;

        if self.attr.supress_auto_lf {
            t.write(text)
        } else {
            let mut line = Vec::with_capacity(text.len() + 1);
            line.extend_from_slice(text);
            line.push(b'\n');

            t.write(&line)
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern)
        .map_err(|err| Error::Dialogue(format!("bad prompt pattern '{pattern}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::errors::Error;

    #[test]
    fn bad_pattern_is_a_dialogue_failure() {
        assert!(matches!(compile(r"("), Err(Error::Dialogue(_))));
        assert!(compile(r"#\s*$").is_ok());
    }
}
