//! Hand-off of completed requests to the host
//!
//! Calls become `tel:` URIs and messages `smsto:` URIs. Each is logged, and
//! when a hook command is configured it is spawned with the URI (and the
//! message body) appended. Hooks run detached so the event loop never waits
//! on them.

use std::fmt;
use std::process::Stdio;

use bleserver_core::PeripheralEvent;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{CliError, Result};

/// A request ready to be acted on by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Call { uri: String },
    Message { uri: String, body: String },
}

impl Action {
    pub fn uri(&self) -> &str {
        match self {
            Action::Call { uri } | Action::Message { uri, .. } => uri,
        }
    }

    /// Trailing arguments passed to a hook command
    pub fn hook_args(&self) -> Vec<String> {
        match self {
            Action::Call { uri } => vec![uri.clone()],
            Action::Message { uri, body } => vec![uri.clone(), body.clone()],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Call { uri } => write!(f, "call {}", uri),
            Action::Message { uri, body } => write!(f, "message {} ({} bytes)", uri, body.len()),
        }
    }
}

/// Turns produced events into host actions
#[derive(Debug, Clone, Default)]
pub struct ActionDispatcher {
    call_command: Option<Vec<String>>,
    message_command: Option<Vec<String>>,
}

impl ActionDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            call_command: config.call_command.as_deref().and_then(split_command),
            message_command: config.message_command.as_deref().and_then(split_command),
        }
    }

    /// Action for a completed request; `None` for every other event
    pub fn action_for(event: &PeripheralEvent) -> Option<Action> {
        match event {
            PeripheralEvent::CallRequested { number } => Some(Action::Call {
                uri: format!("tel:{}", number),
            }),
            PeripheralEvent::MessageRequested { number, text } => Some(Action::Message {
                uri: format!("smsto:{}", number),
                body: text.clone(),
            }),
            _ => None,
        }
    }

    /// Dispatch the action for `event`, returning it when there was one
    pub fn dispatch(&self, event: &PeripheralEvent) -> Result<Option<Action>> {
        let Some(action) = Self::action_for(event) else {
            return Ok(None);
        };
        info!("Dispatching {}", action);

        let hook = match action {
            Action::Call { .. } => self.call_command.as_ref(),
            Action::Message { .. } => self.message_command.as_ref(),
        };
        if let Some(hook) = hook {
            self.spawn_hook(hook, &action)?;
        }
        Ok(Some(action))
    }

    fn spawn_hook(&self, hook: &[String], action: &Action) -> Result<()> {
        let Some((program, args)) = hook.split_first() else {
            return Ok(());
        };
        let mut child = Command::new(program)
            .args(args)
            .args(action.hook_args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| CliError::Dispatch(format!("Failed to run {}: {}", program, e)))?;

        let program = program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Hook {} finished", program),
                Ok(status) => warn!("Hook {} exited with {}", program, status),
                Err(e) => warn!("Hook {} could not be awaited: {}", program, e),
            }
        });
        Ok(())
    }
}

fn split_command(command: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    (!parts.is_empty()).then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleserver_core::{AdvertiseFailure, ShutdownReason};

    #[test]
    fn test_call_becomes_tel_uri() {
        let event = PeripheralEvent::CallRequested {
            number: "+15551234567".into(),
        };
        let action = ActionDispatcher::action_for(&event).unwrap();
        assert_eq!(action.uri(), "tel:+15551234567");
        assert_eq!(action.hook_args(), vec!["tel:+15551234567"]);
    }

    #[test]
    fn test_message_becomes_smsto_uri_with_body() {
        let event = PeripheralEvent::MessageRequested {
            number: "42".into(),
            text: "on my way".into(),
        };
        assert_eq!(
            ActionDispatcher::action_for(&event),
            Some(Action::Message {
                uri: "smsto:42".into(),
                body: "on my way".into(),
            })
        );
    }

    #[test]
    fn test_lifecycle_events_are_not_dispatched() {
        let dispatcher = ActionDispatcher::default();
        let events = [
            PeripheralEvent::advertising_failed(AdvertiseFailure::TimedOut),
            PeripheralEvent::ShutdownRequested {
                reason: ShutdownReason::AdvertisingTimedOut,
            },
            PeripheralEvent::InitializationFailed {
                reason: "no adapter".into(),
            },
        ];
        for event in &events {
            assert_eq!(dispatcher.dispatch(event).unwrap(), None);
        }
    }

    #[test]
    fn test_blank_hook_is_ignored() {
        let dispatcher = ActionDispatcher::new(&DispatchConfig {
            call_command: Some("  ".into()),
            message_command: Some("notify-send  -u low".into()),
        });
        assert!(dispatcher.call_command.is_none());
        assert_eq!(
            dispatcher.message_command,
            Some(vec!["notify-send".into(), "-u".into(), "low".into()])
        );
    }

    #[tokio::test]
    async fn test_missing_hook_program_reports_error() {
        let dispatcher = ActionDispatcher::new(&DispatchConfig {
            call_command: Some("/nonexistent/bleserver-hook".into()),
            message_command: None,
        });
        let event = PeripheralEvent::CallRequested { number: "1".into() };
        assert!(matches!(
            dispatcher.dispatch(&event),
            Err(CliError::Dispatch(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_runs_without_blocking() {
        let dispatcher = ActionDispatcher::new(&DispatchConfig {
            call_command: Some("true".into()),
            message_command: None,
        });
        let event = PeripheralEvent::CallRequested { number: "1".into() };
        let action = dispatcher.dispatch(&event).unwrap();
        assert_eq!(action.map(|a| a.uri().to_string()), Some("tel:1".into()));
    }
}
