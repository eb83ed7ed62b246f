use clap::Args;
use jitcall::loader::Result as LoaderResult;
use jitcall::{payload, text};

#[derive(Args)]
pub struct Cmd {
    /// Show the stub before its data reference is resolved
    #[arg(long)]
    pub unresolved: bool,
}

impl Cmd {
    pub fn execute(&self) -> LoaderResult<()> {
        let buffer = if self.unresolved {
            payload::write_stub(payload::STDOUT, payload::GREETING)?.buffer
        } else {
            payload::hello_world()?
        };

        for line in text::listing(&buffer) {
            let hex: Vec<String> = line.bytes.iter().map(|b| format!("{b:02x}")).collect();
            println!("{:04x}  {:<24}{}", line.offset, hex.join(" "), line.text);
        }
        if let Some(data) = buffer.data_range() {
            let start = data.start;
            println!(
                "{:04x}  data {:?}",
                start,
                String::from_utf8_lossy(&buffer.as_bytes()[data])
            );
        }
        for site in text::find_syscalls(&buffer) {
            println!("syscall at {:#06x}", site.offset);
        }
        for reference in text::rip_references(&buffer) {
            println!("rip-relative at {:#06x} -> {:#06x}", reference.offset, reference.target);
        }
        for site in buffer.unresolved() {
            println!("unresolved placeholder at {:#06x}", site.placeholder());
        }
        if text::falls_through(&buffer) {
            println!("warning: code falls through into data");
        }
        Ok(())
    }
}
