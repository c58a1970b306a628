// The kernel instance
//
// One `Kernel` owns the arena, the ready queue, the per-CPU records, the
// image table and the user terminal. On bare metal a single instance lives in
// `KERNEL` behind one spin lock; tests build as many private instances as
// they like.
use alloc::boxed::Box;
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use spin::Mutex;

use crate::config::{ConfigError, KernelConfig};
use crate::console::Console;
use crate::fault::KernelFault;
use crate::memory::{BlockAllocator, PhysicalMemory};
use crate::process::context::{Context, PerCpu};
use crate::process::pcb::{ProcessId, ProcessInfo};
use crate::process::queue::ProcessQueue;
use crate::process::scheduler::SchedulerStats;

/// Read-only table of executable images, indexed by image id.
pub type ImageTable = &'static [&'static [u8]];

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) allocator: BlockAllocator,
    pub(crate) queue: ProcessQueue,
    pub(crate) cpus: Vec<PerCpu>,
    pub(crate) images: ImageTable,
    pub(crate) memory: Box<dyn PhysicalMemory>,
    pub(crate) terminal: Box<dyn Console>,
    pub(crate) next_pid: ProcessId,
    pub(crate) scheduler: SchedulerStats,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        images: ImageTable,
        memory: Box<dyn PhysicalMemory>,
        terminal: Box<dyn Console>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Kernel {
            allocator: BlockAllocator::new(
                config.lowest_available_physical_memory,
                config.top_of_available_physical_memory,
            ),
            queue: ProcessQueue::new(),
            cpus: (0..config.processor_count).map(PerCpu::new).collect(),
            images,
            memory,
            terminal,
            next_pid: 1,
            scheduler: SchedulerStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn queue(&self) -> &ProcessQueue {
        &self.queue
    }

    pub fn images(&self) -> ImageTable {
        self.images
    }

    pub fn memory(&self) -> &dyn PhysicalMemory {
        self.memory.as_ref()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler
    }

    pub fn cpu(&self, cpu: usize) -> Result<&PerCpu, KernelFault> {
        self.cpus.get(cpu).ok_or(KernelFault::UnknownProcessor(cpu))
    }

    pub fn cpu_mut(&mut self, cpu: usize) -> Result<&mut PerCpu, KernelFault> {
        self.cpus.get_mut(cpu).ok_or(KernelFault::UnknownProcessor(cpu))
    }

    /// Process that runs when `cpu` next returns to user mode.
    pub fn active_pid(&self, cpu: usize) -> Option<ProcessId> {
        self.cpus.get(cpu).and_then(PerCpu::active)
    }

    pub fn active_context(&self, cpu: usize) -> Option<&Context> {
        let pid = self.active_pid(cpu)?;
        self.queue.find(pid).map(|entry| entry.context.as_ref())
    }

    /// Context that a trap from user mode saves into.
    pub fn active_context_mut(&mut self, cpu: usize) -> Result<&mut Context, KernelFault> {
        let pid = self.cpu(cpu)?.active().ok_or(KernelFault::NoActiveContext)?;
        self.queue
            .find_mut(pid)
            .map(|entry| entry.context.as_mut())
            .ok_or(KernelFault::StaleContext(pid))
    }

    /// Queued processes from head to tail.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.queue.iter().map(ProcessInfo::from).collect()
    }
}

/// The installed kernel instance
pub static KERNEL: OnceCell<Mutex<Kernel>> = OnceCell::uninit();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyInstalled;

/// Publishes `kernel` as the global instance. Only the first call succeeds.
pub fn install(kernel: Kernel) -> Result<(), AlreadyInstalled> {
    KERNEL
        .try_init_once(|| Mutex::new(kernel))
        .map_err(|_| AlreadyInstalled)
}

/// Runs `f` on the installed kernel with the global lock held.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    let kernel = KERNEL.try_get().ok()?;
    let mut guard = kernel.lock();
    Some(f(&mut *guard))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::console::BufferConsole;
    use crate::elf::{ImageBuilder, PF_R, PF_X};
    use crate::memory::BufferMemory;

    pub const ARENA_BASE: u64 = 0x40_0000;
    pub const ENTRY_OFFSET: u64 = 8;

    pub fn image() -> &'static [u8] {
        ImageBuilder::new()
            .entry(ENTRY_OFFSET)
            .segment(&[0x90; 16], 64, PF_R | PF_X)
            .build()
            .leak()
    }

    /// Kernel with `images` identical images and a 64 KiB arena.
    pub fn kernel(images: usize) -> (Kernel, BufferConsole) {
        let table: Vec<&'static [u8]> = (0..images).map(|_| image()).collect();
        kernel_with(table.leak(), 0x1_0000)
    }

    pub fn kernel_with(images: ImageTable, arena: u64) -> (Kernel, BufferConsole) {
        let terminal = BufferConsole::new();
        let config = KernelConfig::new(ARENA_BASE, ARENA_BASE + arena).with_processor_count(2);
        let kernel = Kernel::new(
            config,
            images,
            Box::new(BufferMemory::new(ARENA_BASE, arena as usize)),
            Box::new(terminal.clone()),
        );
        match kernel {
            Ok(kernel) => (kernel, terminal),
            Err(error) => panic!("fixture config rejected: {}", error),
        }
    }
}
