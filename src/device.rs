//! The user-facing handle to one power meter: transport selection, model
//! auto-detection, and the command API the CLI (or any automation layer)
//! drives.

use crate::proto::engine::Engine;
use crate::proto::{Model, ProtoError, Result, Value};
use crate::transport::Transport;

/// One connected power meter with its resolved model adapter.
pub struct PowerMeter {
    engine: Engine,
}

impl std::fmt::Debug for PowerMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerMeter").finish_non_exhaustive()
    }
}

impl PowerMeter {
    /// Open `devnode` and identify the instrument behind it. `pmtype` can
    /// name the model family to skip auto-detection (any of the strings in
    /// [`Model::pmtypes`]).
    pub async fn open(devnode: &str, baudrate: Option<u32>, pmtype: Option<&str>) -> Result<Self> {
        let transport = Transport::open(devnode, baudrate).await?;
        Self::with_transport(transport, pmtype).await
    }

    /// Identify the instrument on an already opened transport. Without a
    /// model hint every known adapter is probed in turn; if none recognizes
    /// the device, the error lists each adapter and its refusal reason.
    pub async fn with_transport(transport: Transport, pmtype: Option<&str>) -> Result<Self> {
        if let Some(hint) = pmtype {
            let hint = hint.to_lowercase();
            let model = Model::ALL
                .iter()
                .find(|model| model.pmtypes().contains(&hint.as_str()))
                .copied()
                .ok_or_else(|| ProtoError::BadArgument {
                    cmd: "pmtype".to_string(),
                    arg: hint.clone(),
                    expected: Model::ALL
                        .iter()
                        .map(|model| model.pmtypes().join(", "))
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            return match Engine::probe(transport, model).await {
                Ok(engine) => Ok(PowerMeter { engine }),
                Err((_, err)) => Err(err),
            };
        }

        let mut transport = transport;
        let mut failures: Vec<String> = Vec::new();
        for model in Model::ALL {
            log::debug!("probing '{}'", model.name());
            match Engine::probe(transport, *model).await {
                Ok(engine) => return Ok(PowerMeter { engine }),
                Err((returned, err)) => {
                    failures.push(format!(
                        " * {} ({}): {err}",
                        model.pmtypes().join("/"),
                        model.name()
                    ));
                    transport = returned;
                }
            }
        }
        Err(ProtoError::AutoDetect {
            devnode: transport.devnode().to_string(),
            details: failures.join("\n"),
        })
    }

    /// Execute the power meter command `cmd` with the optional argument
    /// `arg`. Returns the command response, or `None` for commands without
    /// one.
    pub async fn command(&mut self, cmd: &str, arg: Option<Value>) -> Result<Option<Value>> {
        self.engine.command(cmd, arg).await
    }

    /// A user-friendly description of the values `cmd` accepts or returns.
    pub fn get_argument_help(&self, cmd: &str) -> Result<String> {
        self.engine.argument_help(cmd)
    }

    /// The public commands of the active model, with descriptions, in name
    /// order.
    pub fn commands(&self) -> Vec<(&str, &'static str)> {
        self.engine.public_commands().collect()
    }

    pub fn model(&self) -> Model {
        self.engine.model()
    }

    /// How many data items one `configure-data-items` call may request.
    pub fn max_data_items(&self) -> usize {
        self.engine.max_data_items()
    }
}
