use clap::Args;
use jitcall::loader::{Loader, Result as LoaderResult};
use jitcall::payload;
use tracing::info;

use super::Strategy;

#[derive(Args)]
pub struct Cmd {
    /// How many times to call the loaded stub
    #[arg(short, long, default_value_t = 1)]
    pub repeat: usize,

    #[arg(short, long, value_enum, default_value_t = Strategy::Rwx)]
    pub strategy: Strategy,
}

impl Cmd {
    pub fn execute(&self) -> LoaderResult<()> {
        let loader = Loader::with_strategy(self.strategy.into());
        let exe = payload::write_executable(&loader, payload::STDOUT, payload::GREETING)?;
        info!(
            strategy = ?loader.strategy(),
            region = ?exe.code().region(),
            repeat = self.repeat,
            "greeting stub loaded"
        );

        for _ in 0..self.repeat {
            exe.run()?;
        }
        Ok(())
    }
}
