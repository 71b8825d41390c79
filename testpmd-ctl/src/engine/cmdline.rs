//! testpmd command line: EAL options, then `--`, then application options.

use std::ffi::OsString;

/// EAL options as strongly-typed variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EalOption {
    /// Core list (e.g., "0,1,2")
    CoreList(String),
    /// Number of memory channels (-n <num>)
    MemoryChannels(u32),
    /// Process type (--proc-type=<type>)
    ProcessType(ProcessType),
    /// Prefix for hugepage and runtime files (--file-prefix=<prefix>)
    FilePrefix(String),
    /// Memory per socket in MB (--socket-mem=<amounts>)
    SocketMem(String),
    /// Allow a PCI device (-a <pci_addr>)
    Allow(String),
    /// Pass-through argument
    Custom(String),
}

impl EalOption {
    fn to_args(&self) -> Vec<String> {
        match self {
            EalOption::CoreList(list) => vec!["-l".to_string(), list.clone()],
            EalOption::MemoryChannels(n) => vec!["-n".to_string(), n.to_string()],
            EalOption::ProcessType(pt) => vec![format!("--proc-type={}", pt.as_str())],
            EalOption::FilePrefix(prefix) => vec![format!("--file-prefix={}", prefix)],
            EalOption::SocketMem(mem) => vec![format!("--socket-mem={}", mem)],
            EalOption::Allow(pci_addr) => vec!["-a".to_string(), pci_addr.clone()],
            EalOption::Custom(arg) => vec![arg.clone()],
        }
    }
}

/// DPDK process type for multi-process support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    Primary,
    Secondary,
    Auto,
}

impl ProcessType {
    fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Primary => "primary",
            ProcessType::Secondary => "secondary",
            ProcessType::Auto => "auto",
        }
    }
}

/// testpmd application options (after `--`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOption {
    /// Interactive prompt (-i)
    Interactive,
    /// Forwarding cores (--nb-cores=<n>)
    ForwardingCores(usize),
    /// Ports to forward on (--nb-ports=<n>)
    Ports(usize),
    /// Port bitmask in hex (--portmask=<mask>)
    PortMask(u64),
    RxQueues(u32),
    TxQueues(u32),
    RxDescriptors(u32),
    TxDescriptors(u32),
}

impl AppOption {
    fn to_arg(&self) -> String {
        match self {
            AppOption::Interactive => "-i".to_string(),
            AppOption::ForwardingCores(n) => format!("--nb-cores={}", n),
            AppOption::Ports(n) => format!("--nb-ports={}", n),
            AppOption::PortMask(mask) => format!("--portmask={:#x}", mask),
            AppOption::RxQueues(n) => format!("--rxq={}", n),
            AppOption::TxQueues(n) => format!("--txq={}", n),
            AppOption::RxDescriptors(n) => format!("--rxd={}", n),
            AppOption::TxDescriptors(n) => format!("--txd={}", n),
        }
    }
}

/// Builder for the engine's argument vector.
///
/// # Example
/// ```
/// use testpmd_ctl::engine::cmdline::{EngineCommand, ProcessType};
///
/// let cmd = EngineCommand::new("testpmd")
///     .core_list("0,1")
///     .process_type(ProcessType::Auto)
///     .allow("0000:86:00.0")
///     .interactive()
///     .ports(1);
/// assert_eq!(
///     cmd.args(),
///     ["-l", "0,1", "--proc-type=auto", "-a", "0000:86:00.0", "--", "-i", "--nb-ports=1"]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct EngineCommand {
    program: OsString,
    eal: Vec<EalOption>,
    app: Vec<AppOption>,
}

impl EngineCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            eal: Vec::new(),
            app: Vec::new(),
        }
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Set core list (-l <list>)
    pub fn core_list(mut self, list: impl Into<String>) -> Self {
        self.eal.push(EalOption::CoreList(list.into()));
        self
    }

    /// Set number of memory channels (-n <num>)
    pub fn memory_channels(mut self, n: u32) -> Self {
        self.eal.push(EalOption::MemoryChannels(n));
        self
    }

    pub fn process_type(mut self, pt: ProcessType) -> Self {
        self.eal.push(EalOption::ProcessType(pt));
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.eal.push(EalOption::FilePrefix(prefix.into()));
        self
    }

    pub fn socket_mem(mut self, mem: impl Into<String>) -> Self {
        self.eal.push(EalOption::SocketMem(mem.into()));
        self
    }

    /// Allow a PCI device (-a <pci_addr>)
    pub fn allow(mut self, pci_addr: impl Into<String>) -> Self {
        self.eal.push(EalOption::Allow(pci_addr.into()));
        self
    }

    /// Add a raw EAL argument
    pub fn eal_arg(mut self, arg: impl Into<String>) -> Self {
        self.eal.push(EalOption::Custom(arg.into()));
        self
    }

    pub fn interactive(mut self) -> Self {
        self.app.push(AppOption::Interactive);
        self
    }

    pub fn forwarding_cores(mut self, n: usize) -> Self {
        self.app.push(AppOption::ForwardingCores(n));
        self
    }

    pub fn ports(mut self, n: usize) -> Self {
        self.app.push(AppOption::Ports(n));
        self
    }

    pub fn port_mask(mut self, mask: u64) -> Self {
        self.app.push(AppOption::PortMask(mask));
        self
    }

    /// Same queue count for rx and tx
    pub fn queues(mut self, n: u32) -> Self {
        self.app.push(AppOption::RxQueues(n));
        self.app.push(AppOption::TxQueues(n));
        self
    }

    /// Same descriptor ring size for rx and tx
    pub fn ring_size(mut self, n: u32) -> Self {
        self.app.push(AppOption::RxDescriptors(n));
        self.app.push(AppOption::TxDescriptors(n));
        self
    }

    /// Argument vector without the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.eal.iter().flat_map(EalOption::to_args).collect();
        if !self.app.is_empty() {
            args.push("--".to_string());
            args.extend(self.app.iter().map(AppOption::to_arg));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_command() {
        let cmd = EngineCommand::new("/usr/bin/dpdk-testpmd")
            .core_list("2,3,4")
            .memory_channels(4)
            .process_type(ProcessType::Auto)
            .file_prefix("abc")
            .socket_mem("2048,0")
            .allow("0000:86:00.0")
            .allow("0000:86:00.1")
            .interactive()
            .forwarding_cores(2)
            .ports(2)
            .port_mask(0x3)
            .queues(1)
            .ring_size(2048);

        assert_eq!(cmd.program(), "/usr/bin/dpdk-testpmd");
        assert_eq!(
            cmd.args(),
            [
                "-l",
                "2,3,4",
                "-n",
                "4",
                "--proc-type=auto",
                "--file-prefix=abc",
                "--socket-mem=2048,0",
                "-a",
                "0000:86:00.0",
                "-a",
                "0000:86:00.1",
                "--",
                "-i",
                "--nb-cores=2",
                "--nb-ports=2",
                "--portmask=0x3",
                "--rxq=1",
                "--txq=1",
                "--rxd=2048",
                "--txd=2048",
            ]
        );
    }

    #[test]
    fn test_no_app_options_omits_separator() {
        let cmd = EngineCommand::new("testpmd")
            .eal_arg("--no-huge")
            .process_type(ProcessType::Primary);
        assert_eq!(cmd.args(), ["--no-huge", "--proc-type=primary"]);
    }
}
