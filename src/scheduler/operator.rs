// src/scheduler/operator.rs
//! Operator commands
//!
//! Text commands read from the console, applied between ticks:
//!
//! ```text
//! primary <n>   promote instance n to primary
//! focus <n>     give instance n the focused slot
//! reset         end the current run, promote the next ready instance
//! boot <n>      boot a DEAD instance (when auto-launch is off)
//! hide-all      hide every instance source on the display
//! status        print a JSON snapshot
//! ```

use crate::scheduler::engine::Scheduler;
use crate::utils::errors::{EngineError, Result};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Primary(u32),
    Focus(u32),
    Reset,
    Boot(u32),
    HideAll,
    Status,
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidCommand(message)
}

fn instance_arg(verb: &str, arg: Option<&str>) -> Result<u32> {
    let arg = arg.ok_or_else(|| invalid(format!("{} needs an instance number", verb)))?;
    arg.parse::<u32>()
        .map_err(|_| invalid(format!("'{}' is not an instance number", arg)))
}

impl FromStr for OperatorCommand {
    type Err = EngineError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| invalid("empty command".to_string()))?
            .to_ascii_lowercase();
        let arg = words.next();

        if words.next().is_some() {
            return Err(invalid(format!("too many arguments: {}", line.trim())));
        }

        let command = match verb.as_str() {
            "primary" => OperatorCommand::Primary(instance_arg(&verb, arg)?),
            "focus" => OperatorCommand::Focus(instance_arg(&verb, arg)?),
            "boot" => OperatorCommand::Boot(instance_arg(&verb, arg)?),
            "reset" => OperatorCommand::Reset,
            "hide-all" => OperatorCommand::HideAll,
            "status" => OperatorCommand::Status,
            other => return Err(invalid(format!("unknown command '{}'", other))),
        };

        let takes_arg = matches!(
            command,
            OperatorCommand::Primary(_) | OperatorCommand::Focus(_) | OperatorCommand::Boot(_)
        );
        if arg.is_some() && !takes_arg {
            return Err(invalid(format!("{} takes no argument", verb)));
        }

        Ok(command)
    }
}

impl Scheduler {
    /// Apply one operator command; returns a line for the operator
    pub async fn apply(&mut self, command: OperatorCommand) -> Result<String> {
        match command {
            OperatorCommand::Primary(num) => {
                self.set_new_primary(num).await?;
                Ok(format!("instance {} is primary", num))
            }
            OperatorCommand::Focus(num) => {
                self.set_new_focused(num).await?;
                Ok(format!("instance {} is focused", num))
            }
            OperatorCommand::Reset => match self.reset_active().await? {
                Some(next) => Ok(format!("run reset, instance {} is primary", next)),
                None => Ok("no instance ready to promote".to_string()),
            },
            OperatorCommand::Boot(num) => {
                if self.request_boot(num)? {
                    Ok(format!("instance {} queued for boot", num))
                } else {
                    Ok(format!("instance {} is not waiting to boot", num))
                }
            }
            OperatorCommand::HideAll => {
                let hidden = self.hide_all().await;
                Ok(format!("hid {} sources", hidden))
            }
            OperatorCommand::Status => Ok(serde_json::to_string(&self.snapshot())?),
        }
    }
}
