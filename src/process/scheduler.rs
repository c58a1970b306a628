// Round-robin scheduler for kestrel
use crate::fault::KernelFault;
use crate::kernel::Kernel;
use crate::memory::BlockAllocator;
use crate::process::pcb::{ProcessId, ProcessState};
use crate::process::queue::ProcessQueue;

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub invocations: u64,
    pub switches: u64,
}

/// Moves the head of the queue to its tail.
///
/// The old head becomes READY and the new head RUNNING. With fewer than two
/// processes nothing happens and `None` is returned.
pub fn rotate(
    queue: &mut ProcessQueue,
    arena: &mut BlockAllocator,
) -> Result<Option<ProcessId>, KernelFault> {
    if queue.len() < 2 {
        return Ok(None);
    }

    // The popped node is released before the push, so its space is reused.
    let entry = queue.pop_front(arena)?;
    queue.push_back(arena, entry)?;
    queue.back_mut()?.state = ProcessState::Ready;

    let head = queue.front_mut()?;
    head.state = ProcessState::Running;
    Ok(Some(head.pid))
}

impl Kernel {
    /// Rotates the ready queue and activates the new head on `cpu`.
    pub fn schedule(&mut self, cpu: usize) -> Result<(), KernelFault> {
        self.cpu(cpu)?;
        self.scheduler.invocations += 1;

        if let Some(pid) = rotate(&mut self.queue, &mut self.allocator)? {
            self.cpu_mut(cpu)?.set_active(Some(pid));
            self.scheduler.switches += 1;
        }
        Ok(())
    }

    /// Counts one timer tick; every `scheduler_divisor`-th tick schedules.
    ///
    /// Returns whether the scheduler ran.
    pub fn timer_tick(&mut self, cpu: usize) -> Result<bool, KernelFault> {
        self.scheduler.ticks += 1;
        if self.scheduler.ticks % self.config.scheduler_divisor != 0 {
            return Ok(false);
        }
        self.schedule(cpu)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::fixtures;
    use crate::BSP;
    use alloc::vec::Vec;

    fn order(kernel: &Kernel) -> Vec<(ProcessId, ProcessState)> {
        kernel.processes().iter().map(|p| (p.pid, p.state)).collect()
    }

    #[test]
    fn rotates_three_processes() {
        let (mut kernel, _) = fixtures::kernel(3);
        for image in 0..3 {
            kernel.create_process(BSP, image).unwrap();
        }
        assert_eq!(
            order(&kernel),
            [(1, ProcessState::Running), (2, ProcessState::Ready), (3, ProcessState::Ready)]
        );

        kernel.schedule(BSP).unwrap();
        assert_eq!(
            order(&kernel),
            [(2, ProcessState::Running), (3, ProcessState::Ready), (1, ProcessState::Ready)]
        );
        assert_eq!(kernel.active_pid(BSP), Some(2));
        assert_eq!(kernel.scheduler_stats().switches, 1);
    }

    #[test]
    fn single_process_is_left_alone() {
        let (mut kernel, _) = fixtures::kernel(1);
        kernel.create_process(BSP, 0).unwrap();
        let before = kernel.allocator().stats();

        kernel.schedule(BSP).unwrap();
        assert_eq!(order(&kernel), [(1, ProcessState::Running)]);
        assert_eq!(kernel.active_pid(BSP), Some(1));
        assert_eq!(kernel.allocator().stats(), before);
    }

    #[test]
    fn empty_queue_is_a_no_op() {
        let (mut kernel, _) = fixtures::kernel(0);
        kernel.schedule(BSP).unwrap();
        assert_eq!(kernel.active_pid(BSP), None);
    }

    #[test]
    fn rotation_does_not_grow_the_arena() {
        let (mut kernel, _) = fixtures::kernel(2);
        kernel.create_process(BSP, 0).unwrap();
        kernel.create_process(BSP, 1).unwrap();
        let before = kernel.allocator().stats();

        for _ in 0..10 {
            kernel.schedule(BSP).unwrap();
        }
        let after = kernel.allocator().stats();
        assert_eq!(after.used_bytes, before.used_bytes);
        assert_eq!(after.arena_end, before.arena_end);
    }

    #[test]
    fn runs_on_every_eighth_tick() {
        let (mut kernel, _) = fixtures::kernel(2);
        kernel.create_process(BSP, 0).unwrap();
        kernel.create_process(BSP, 1).unwrap();

        let ran: Vec<bool> = (0..16).map(|_| kernel.timer_tick(BSP).unwrap()).collect();
        assert_eq!(ran.iter().filter(|&&r| r).count(), 2);
        assert!(ran[7] && ran[15]);
        assert_eq!(kernel.active_pid(BSP), Some(1));
        assert_eq!(kernel.scheduler_stats().ticks, 16);
    }
}
