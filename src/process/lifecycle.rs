// Process creation and termination
use alloc::boxed::Box;
use core::mem;

use crate::console::Console;
use crate::elf::{self, ElfImage};
use crate::fault::KernelFault;
use crate::kernel::Kernel;
use crate::kprintln;
use crate::memory::BlockAllocator;
use crate::process::context::Context;
use crate::process::pcb::{ProcessEntry, ProcessError, ProcessId, ProcessState};
use crate::process::queue::ProcessQueue;

/// Arena bytes charged for one context record.
pub const CONTEXT_FOOTPRINT: u64 = mem::size_of::<Context>() as u64;

fn give_back(arena: &mut BlockAllocator, address: u64) -> Result<(), KernelFault> {
    arena.release(address).map_err(|_| KernelFault::ArenaCorrupted)
}

impl Kernel {
    /// Loads image `image_id` and appends it to the ready queue.
    ///
    /// If the queue was empty the new process becomes RUNNING and active on
    /// `cpu` right away. Every recoverable failure leaves the arena as it was.
    pub fn create_process(&mut self, cpu: usize, image_id: usize) -> Result<ProcessId, ProcessError> {
        self.cpu(cpu)?;
        let bytes = *self
            .images
            .get(image_id)
            .ok_or(ProcessError::InvalidImageIndex(image_id))?;
        let image = ElfImage::parse(bytes).map_err(ProcessError::InvalidImage)?;

        let node = ProcessQueue::reserve_node(&mut self.allocator)
            .map_err(|_| ProcessError::InsufficientMemory)?;

        let loaded = match elf::load(&image, &mut self.allocator, self.memory.as_mut()) {
            Ok(loaded) => loaded,
            Err(error) => {
                node.cancel(&mut self.allocator)?;
                return Err(error.into());
            }
        };

        let context_location = match self.allocator.allocate(CONTEXT_FOOTPRINT) {
            Ok(address) => address,
            Err(_) => {
                give_back(&mut self.allocator, loaded.memory_base)?;
                node.cancel(&mut self.allocator)?;
                return Err(ProcessError::InsufficientMemory);
            }
        };

        let pid = self.next_pid;
        self.next_pid += 1;

        let first = self.queue.is_empty();
        self.queue.push_reserved(
            node,
            ProcessEntry {
                pid,
                id: image_id,
                memory_location: loaded.memory_base,
                context: Box::new(Context::new(
                    loaded.entry_point,
                    self.config.user_rflags,
                )),
                context_location,
                state: if first {
                    ProcessState::Running
                } else {
                    ProcessState::Ready
                },
            },
        );
        if first {
            self.cpu_mut(cpu)?.set_active(Some(pid));
        }

        kprintln!(
            "[PROC] Created process {} from image {} at {:#x}, entry {:#x}",
            pid,
            image_id,
            loaded.memory_base,
            loaded.entry_point
        );
        Ok(pid)
    }

    /// Ends the running process, the head of the queue.
    ///
    /// The next head becomes the active context but keeps its state until the
    /// scheduler runs. Returns the id of the terminated process.
    pub fn terminate_current_process(&mut self, cpu: usize) -> Result<ProcessId, KernelFault> {
        self.cpu(cpu)?;
        let entry = self.queue.pop_front(&mut self.allocator)?;
        give_back(&mut self.allocator, entry.context_location)?;
        give_back(&mut self.allocator, entry.memory_location)?;

        let next = self.queue.peek_front().ok().map(|head| head.pid);
        self.cpu_mut(cpu)?.set_active(next);

        kprintln!("[PROC] Terminated process {}", entry.pid);
        if next.is_none() {
            self.terminal.write_str("the last process is terminated!\n");
        }
        Ok(entry.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{ElfError, ImageBuilder, LoadError, PF_R};
    use crate::kernel::fixtures;
    use crate::BSP;

    #[test]
    fn first_process_starts_running() {
        let (mut kernel, _) = fixtures::kernel(2);
        let pid = kernel.create_process(BSP, 0).unwrap();

        assert_eq!(kernel.active_pid(BSP), Some(pid));
        let head = kernel.queue().peek_front().unwrap();
        assert_eq!(head.state, ProcessState::Running);
        assert_eq!(head.context.rflags, 0x200);
        assert_eq!(head.context.rip, head.memory_location + fixtures::ENTRY_OFFSET);
    }

    #[test]
    fn later_processes_queue_up_ready() {
        let (mut kernel, _) = fixtures::kernel(2);
        let first = kernel.create_process(BSP, 0).unwrap();
        let second = kernel.create_process(BSP, 1).unwrap();

        assert_eq!(kernel.active_pid(BSP), Some(first));
        let info = kernel.processes();
        assert_eq!(info[1].pid, second);
        assert_eq!(info[1].image, 1);
        assert_eq!(info[1].state, ProcessState::Ready);
    }

    #[test]
    fn terminate_frees_everything_and_activates_next() {
        let (mut kernel, terminal) = fixtures::kernel(2);
        kernel.create_process(BSP, 0).unwrap();
        let baseline = kernel.allocator().stats().used_bytes;
        let second = kernel.create_process(BSP, 1).unwrap();

        assert_eq!(kernel.terminate_current_process(BSP), Ok(1));
        assert_eq!(kernel.active_pid(BSP), Some(second));
        // Termination does not flip the new head to RUNNING.
        assert_eq!(kernel.queue().peek_front().unwrap().state, ProcessState::Ready);
        assert_eq!(kernel.allocator().stats().used_bytes, baseline);
        assert!(terminal.contents().is_empty());

        assert_eq!(kernel.terminate_current_process(BSP), Ok(second));
        assert_eq!(kernel.active_pid(BSP), None);
        assert!(kernel.allocator().is_empty());
        assert_eq!(terminal.contents(), b"the last process is terminated!\n");
    }

    #[test]
    fn terminating_with_nothing_queued_is_a_fault() {
        let (mut kernel, _) = fixtures::kernel(1);
        assert_eq!(kernel.terminate_current_process(BSP), Err(KernelFault::QueueEmpty));
    }

    #[test]
    fn bad_indices_and_images_are_recoverable() {
        let broken: &'static [u8] = b"not an elf image at all, definitely not one";
        let images: &'static [&'static [u8]] = alloc::vec![broken].leak();
        let (mut kernel, _) = fixtures::kernel_with(images, 0x1_0000);

        assert_eq!(kernel.create_process(BSP, 7), Err(ProcessError::InvalidImageIndex(7)));
        assert!(matches!(kernel.create_process(BSP, 0), Err(ProcessError::InvalidImage(_))));
        assert!(kernel.queue().is_empty());
        assert!(kernel.allocator().is_empty());
    }

    #[test]
    fn entry_outside_the_image_is_rejected() {
        let wild = ImageBuilder::new().entry(u64::MAX).segment(&[0; 8], 8, PF_R).build();
        let far = ImageBuilder::new().entry(0x10_0000).segment(&[0; 8], 8, PF_R).build();
        let images: &'static [&'static [u8]] = alloc::vec![&*wild.leak(), &*far.leak()].leak();
        let (mut kernel, _) = fixtures::kernel_with(images, 0x4000);

        for image in 0..2 {
            assert_eq!(
                kernel.create_process(BSP, image),
                Err(ProcessError::InvalidImage(ElfError::EntryOutsideImage))
            );
        }
        assert!(kernel.queue().is_empty());
        assert!(kernel.allocator().is_empty());
    }

    #[test]
    fn out_of_memory_rolls_back() {
        let big = ImageBuilder::new().segment(&[0; 8], 0x8000, PF_R).build();
        let images: &'static [&'static [u8]] = alloc::vec![&*big.leak()].leak();
        let (mut kernel, _) = fixtures::kernel_with(images, 0x4000);

        assert_eq!(kernel.create_process(BSP, 0), Err(ProcessError::InsufficientMemory));
        assert!(kernel.allocator().is_empty());
        assert_eq!(kernel.active_pid(BSP), None);
    }

    #[test]
    fn broken_layouts_are_fatal() {
        let gap = ImageBuilder::new().segment_at(8, &[0; 8], 8, PF_R).build();
        let images: &'static [&'static [u8]] = alloc::vec![&*gap.leak()].leak();
        let (mut kernel, _) = fixtures::kernel_with(images, 0x4000);

        assert_eq!(
            kernel.create_process(BSP, 0),
            Err(ProcessError::Fatal(KernelFault::IllegalImageLayout))
        );
        assert_eq!(
            ProcessError::from(LoadError::OutOfMemory),
            ProcessError::InsufficientMemory
        );
    }
}
