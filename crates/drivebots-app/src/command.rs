use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, TrySendError, detect_backoff_cfg};
use drivebots_core::{
    ControlCommand, Controller, GeneticScheduler, PhysicsWorld, SimulationError,
    apply_control_command,
};
use tracing::{debug, warn};

/// Line commands understood by the interactive shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Control(ControlCommand),
    Quit,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Self::Control(ControlCommand::Start)),
            "kill" | "k" => Some(Self::Control(ControlCommand::Kill)),
            "reset" | "r" => Some(Self::Control(ControlCommand::Reset)),
            "quit" | "q" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// What the frame loop should do after draining the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Open,
    Quit,
    /// Every sender is gone; no further commands can arrive.
    Closed,
}

pub type CommandSender = MAsyncTx<ShellCommand>;
pub type CommandReceiver = MRx<ShellCommand>;
pub type CommandSubmit = Arc<dyn Fn(ShellCommand) -> bool + Send + Sync>;

pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Apply every queued command to `scheduler`, stopping early on `quit`.
pub fn drain_pending_commands<W: PhysicsWorld, C: Controller>(
    receiver: &CommandReceiver,
    scheduler: &mut GeneticScheduler<W, C>,
) -> Result<BusStatus, SimulationError> {
    loop {
        match receiver.try_recv() {
            Ok(ShellCommand::Control(command)) => {
                debug!(?command, "applying control command");
                apply_control_command(scheduler, command)?;
            }
            Ok(ShellCommand::Quit) => return Ok(BusStatus::Quit),
            Err(TryRecvError::Empty) => return Ok(BusStatus::Open),
            Err(TryRecvError::Disconnected) => return Ok(BusStatus::Closed),
        }
    }
}

pub fn make_command_submit(sender: CommandSender) -> CommandSubmit {
    let sender = Arc::new(sender);
    Arc::new(
        move |command: ShellCommand| match sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                warn!(?cmd, "control command queue full; dropping command");
                false
            }
            Err(TrySendError::Disconnected(cmd)) => {
                warn!(?cmd, "control command queue disconnected");
                false
            }
        },
    )
}

/// Forward commands typed on stdin until `quit` or end of input.
pub fn spawn_stdin_reader(submit: CommandSubmit) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("drivebots-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ShellCommand::parse(&line) {
                    Some(command) => {
                        submit(command);
                        if command == ShellCommand::Quit {
                            break;
                        }
                    }
                    None => warn!(
                        input = %line.trim(),
                        "unknown command; expected start, kill, reset or quit"
                    ),
                }
            }
            debug!("stdin reader finished");
        })
}
