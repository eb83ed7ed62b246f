pub mod inspect;
pub mod run;

use clap::ValueEnum;
use jitcall::loader::AllocStrategy;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Strategy {
    /// One read+write+execute mapping
    #[default]
    Rwx,
    /// Write first, then switch the mapping to read+execute
    Staged,
}

impl From<Strategy> for AllocStrategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Rwx => AllocStrategy::ReadWriteExecute,
            Strategy::Staged => AllocStrategy::WriteThenExecute,
        }
    }
}
