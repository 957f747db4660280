//! Round-robin scheduler with deferred preemption.
//!
//! The timer IRQ never context-switches; it burns the running process's
//! quantum and raises `reschedule_requested`. Cooperative safe points
//! (yield, the idle loop, the desktop redraw cycle) call
//! [`check_reschedule`], which consumes the flag and runs [`schedule`].
//!
//! `schedule` picks the next ready slot round-robin starting after the
//! last scheduled index, skipping the idle slot, and falls back to idle
//! (PID 1) when nothing else is ready. The switch itself is the
//! callee-saved style: only ESP and a resume EIP survive suspension.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::arch;
use crate::config::{DEFAULT_QUANTUM, DEFAULT_STACK, MAX_PROCESSES};
use crate::error::SchedError;
use crate::process::{Pcb, ProcessId, ProcessState, ProcessTable};

/// Set from the timer IRQ when the running quantum expires; consumed only
/// at cooperative safe points.
static RESCHEDULE_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Context switches performed since boot.
static SWITCH_COUNT: AtomicU64 = AtomicU64::new(0);

/// Everything `schedule` needs to perform one switch, captured under the
/// scheduler lock and consumed after it is released (interrupts stay off
/// in between).
pub struct SwitchPlan {
    pub old_esp_slot: *mut usize,
    pub new_esp: usize,
    pub new_eip: usize,
}

/// Scratch ESP sink for switches away from a context that will never be
/// resumed (a terminated process, or boot before registration).
struct DiscardSlot(UnsafeCell<usize>);
// SAFETY: only written through the switch path with interrupts disabled on
// a single CPU; the stored value is never read back.
unsafe impl Sync for DiscardSlot {}
static DISCARD_ESP: DiscardSlot = DiscardSlot(UnsafeCell::new(0));

/// Resume EIP recorded for a suspended process.
fn resume_eip() -> usize {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        arch::x86::context::context_switch_resume as usize
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        // Host builds never jump through this; a recognizable sentinel
        // keeps the tests honest.
        0xDEAD_0000
    }
}

/// Scheduler core: the process table plus rotation state.
pub struct Scheduler {
    table: ProcessTable,
    /// Slot index of the running process.
    current: Option<usize>,
    /// Slot index the round-robin scan starts after.
    last_index: usize,
    enabled: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            table: ProcessTable::new(),
            current: None,
            last_index: 0,
            enabled: false,
        }
    }

    /// Create the idle thread (PID 1), register the boot flow as a normal
    /// schedulable PCB, and enable scheduling.
    pub fn start(&mut self) -> Result<ProcessId, SchedError> {
        let idle = self
            .table
            .create(idle_main as usize, "idle", DEFAULT_STACK, ProcessId::KERNEL)?;
        debug_assert_eq!(idle, ProcessId::IDLE);
        let boot = self.table.register_bootstrap("kernel")?;
        self.current = boot.slot();
        self.enabled = true;
        Ok(boot)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_pid(&self) -> ProcessId {
        self.current
            .map(ProcessId::from_slot)
            .unwrap_or(ProcessId::KERNEL)
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ProcessTable {
        &mut self.table
    }

    /// Create a new process; the parent is the current process.
    pub fn create(
        &mut self,
        entry: usize,
        name: &str,
        stack_size: usize,
    ) -> Result<ProcessId, SchedError> {
        let parent = self.current_pid();
        self.table.create(entry, name, stack_size, parent)
    }

    /// Create a new process whose entry receives one argument.
    pub fn create_with_arg(
        &mut self,
        entry: usize,
        name: &str,
        stack_size: usize,
        arg: usize,
    ) -> Result<ProcessId, SchedError> {
        let parent = self.current_pid();
        self.table
            .create_with_arg(entry, name, stack_size, parent, arg)
    }

    /// Round-robin pick: first ready slot after `last_index`, idle slot
    /// excluded from the rotation.
    fn pick_next(&self) -> Option<usize> {
        for step in 1..=MAX_PROCESSES {
            let index = (self.last_index + step) % MAX_PROCESSES;
            if index == 0 {
                continue;
            }
            if let Some(pcb) = self.table.slot(index) {
                if pcb.state == ProcessState::Ready {
                    return Some(index);
                }
            }
        }
        None
    }

    /// One scheduling decision. Returns the switch to perform, or `None`
    /// when the current process simply keeps running (or nothing can run).
    pub fn prepare_switch(&mut self) -> Option<SwitchPlan> {
        if !self.enabled || self.table.live_count() == 0 {
            return None;
        }

        // Suspend the current process: Running -> Ready, with its stack
        // canary checked on the way out. A trampled canary terminates the
        // victim; its stack is reclaimed by the reaper once we are off it.
        if let Some(cur) = self.current {
            if !self.table.stack_canary_ok(cur) {
                log::warn!(
                    target: "sched",
                    "stack canary trampled in pid {}, terminating",
                    ProcessId::from_slot(cur)
                );
                if let Some(pcb) = self.table.slot_mut(cur) {
                    pcb.state = ProcessState::Terminated;
                    pcb.exit_code = -1;
                }
                self.current = None;
            } else if let Some(pcb) = self.table.slot_mut(cur) {
                if pcb.state == ProcessState::Running {
                    pcb.state = ProcessState::Ready;
                }
            }
        }

        // Pick the next slot; fall back to idle when the rotation is dry.
        let pick = match self.pick_next() {
            Some(index) => index,
            None => {
                let idle_ready = matches!(
                    self.table.slot(0),
                    Some(Pcb {
                        state: ProcessState::Ready,
                        ..
                    })
                );
                if !idle_ready {
                    // No idle thread either: restore the current process
                    // and keep going.
                    if let Some(cur) = self.current {
                        if let Some(pcb) = self.table.slot_mut(cur) {
                            pcb.state = ProcessState::Running;
                        }
                    }
                    return None;
                }
                0
            }
        };

        self.last_index = pick;

        // Same slot picked again: no switch, just keep running.
        if self.current == Some(pick) {
            if let Some(pcb) = self.table.slot_mut(pick) {
                pcb.state = ProcessState::Running;
                pcb.quantum = DEFAULT_QUANTUM;
            }
            return None;
        }

        // Outgoing side: a live suspended process resumes at the resume
        // label; a dead or missing one gets its ESP discarded.
        let old_esp_slot = match self.current {
            Some(cur) => match self.table.slot_mut(cur) {
                Some(pcb) if pcb.state != ProcessState::Terminated => {
                    pcb.saved_eip = resume_eip();
                    &mut pcb.saved_esp as *mut usize
                }
                _ => DISCARD_ESP.0.get(),
            },
            None => DISCARD_ESP.0.get(),
        };

        let (new_esp, new_eip) = {
            let pcb = self.table.slot_mut(pick).expect("picked slot is live");
            pcb.state = ProcessState::Running;
            pcb.quantum = DEFAULT_QUANTUM;
            (pcb.saved_esp, pcb.saved_eip)
        };
        self.current = Some(pick);

        Some(SwitchPlan {
            old_esp_slot,
            new_esp,
            new_eip,
        })
    }

    /// Timer-IRQ accounting: charge a tick and request a reschedule when
    /// the quantum runs out. Never switches.
    pub fn timer_tick(&mut self) {
        if let Some(cur) = self.current {
            if let Some(pcb) = self.table.slot_mut(cur) {
                pcb.ticks += 1;
                if pcb.quantum > 0 {
                    pcb.quantum -= 1;
                    if pcb.quantum == 0 {
                        RESCHEDULE_REQUESTED.store(true, Ordering::Release);
                    }
                }
            }
        }
    }

    /// Mark the current process terminated. The caller must follow with a
    /// schedule; the dying stack is freed later by the reaper.
    pub fn exit_current(&mut self, code: i32) -> Result<(), SchedError> {
        let cur = self.current.ok_or(SchedError::InvalidPid { pid: 0 })?;
        if cur == 0 {
            return Err(SchedError::KillRefused {
                pid: ProcessId::IDLE.0,
            });
        }
        if let Some(pcb) = self.table.slot_mut(cur) {
            pcb.state = ProcessState::Terminated;
            pcb.exit_code = code;
        }
        self.current = None;
        Ok(())
    }

    /// Kill another process outright. Refused for PID 0 and the idle
    /// thread; killing self must go through the exit path instead.
    pub fn kill(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        if pid == ProcessId::KERNEL || pid == ProcessId::IDLE {
            return Err(SchedError::KillRefused { pid: pid.0 });
        }
        let slot = pid.slot().ok_or(SchedError::InvalidPid { pid: pid.0 })?;
        if Some(slot) == self.current {
            return self.exit_current(-1);
        }
        self.table.destroy(pid).map(|_| ())
    }

    /// Block a process until [`Scheduler::unblock`].
    pub fn block(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        let pcb = self
            .table
            .get_mut(pid)
            .ok_or(SchedError::InvalidPid { pid: pid.0 })?;
        pcb.state = ProcessState::Blocked;
        if Some(pid.slot().expect("live pid")) == self.current {
            self.current = None;
        }
        Ok(())
    }

    pub fn unblock(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        let pcb = self
            .table
            .get_mut(pid)
            .ok_or(SchedError::InvalidPid { pid: pid.0 })?;
        if pcb.state == ProcessState::Blocked {
            pcb.state = ProcessState::Ready;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global scheduler
// ---------------------------------------------------------------------------

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Bring up the scheduler: idle thread plus the registered boot context.
pub fn init() {
    let boot = arch::without_interrupts(|| SCHEDULER.lock().start());
    match boot {
        Ok(pid) => log::info!(target: "sched", "scheduling enabled, boot context is pid {}", pid),
        Err(e) => panic!("scheduler init failed: {:?}", e),
    }
}

/// Perform one scheduling pass, switching contexts if a different slot is
/// picked.
pub fn schedule() {
    arch::disable_interrupts();
    let plan = SCHEDULER.lock().prepare_switch();
    if let Some(plan) = plan {
        SWITCH_COUNT.fetch_add(1, Ordering::Relaxed);
        perform_switch(plan);
    }
    arch::enable_interrupts();
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn perform_switch(plan: SwitchPlan) {
    // SAFETY: interrupts are disabled, the plan was built under the
    // scheduler lock, and the PCB slots it points into live in a static.
    unsafe {
        arch::x86::context::context_switch(
            plan.old_esp_slot as *mut u32,
            plan.new_esp as u32,
            plan.new_eip as u32,
        );
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn perform_switch(_plan: SwitchPlan) {
    // Host builds: the decision was made; there is no CPU state to move.
}

/// Timer-IRQ entry: account the tick against the running process.
pub fn timer_tick() {
    // The IRQ runs with interrupts off; the lock is uncontended unless the
    // interrupted code holds it, which every locker prevents by disabling
    // interrupts first.
    SCHEDULER.lock().timer_tick();
}

/// Voluntarily give up the CPU. Clears any pending deferred reschedule so
/// the explicit yield is the single switch.
pub fn yield_now() {
    RESCHEDULE_REQUESTED.store(false, Ordering::Release);
    schedule();
}

/// Cooperative safe point: consume the deferred-reschedule flag.
pub fn check_reschedule() {
    if RESCHEDULE_REQUESTED.swap(false, Ordering::AcqRel) {
        schedule();
    }
}

/// True if the timer has requested a reschedule that has not been
/// consumed yet.
pub fn reschedule_pending() -> bool {
    RESCHEDULE_REQUESTED.load(Ordering::Acquire)
}

/// Terminate the current process. Refused for the idle thread.
pub fn exit(code: i32) {
    let ok = arch::without_interrupts(|| SCHEDULER.lock().exit_current(code));
    if ok.is_err() {
        log::warn!(target: "sched", "exit refused: {:?}", ok);
        return;
    }
    schedule();
    // A terminated process is never picked again; on bare metal control
    // cannot come back here.
    #[cfg(target_os = "none")]
    loop {
        arch::halt();
    }
}

/// Create a kernel thread running `entry`.
pub fn create(entry: fn(), name: &str, stack_size: usize) -> Result<ProcessId, SchedError> {
    arch::without_interrupts(|| SCHEDULER.lock().create(entry as usize, name, stack_size))
}

/// Create a process at a raw entry address with one C-ABI argument (the
/// user-program path).
pub fn create_with_arg(
    entry: usize,
    name: &str,
    stack_size: usize,
    arg: usize,
) -> Result<ProcessId, SchedError> {
    arch::without_interrupts(|| SCHEDULER.lock().create_with_arg(entry, name, stack_size, arg))
}

/// Kill a process by PID.
pub fn kill(pid: ProcessId) -> Result<(), SchedError> {
    let killed_self =
        arch::without_interrupts(|| -> Result<bool, SchedError> {
            let mut sched = SCHEDULER.lock();
            let was_current = pid.slot().is_some() && pid.slot() == sched.current_pid().slot();
            sched.kill(pid)?;
            Ok(was_current)
        })?;
    if killed_self {
        schedule();
    }
    Ok(())
}

/// Block a process until [`unblock`].
pub fn block(pid: ProcessId) -> Result<(), SchedError> {
    arch::without_interrupts(|| SCHEDULER.lock().block(pid))?;
    schedule();
    Ok(())
}

pub fn unblock(pid: ProcessId) -> Result<(), SchedError> {
    arch::without_interrupts(|| SCHEDULER.lock().unblock(pid))
}

/// PID of the running process (0 before the scheduler starts).
pub fn current_pid() -> ProcessId {
    arch::without_interrupts(|| SCHEDULER.lock().current_pid())
}

/// Context switches performed since boot.
pub fn switch_count() -> u64 {
    SWITCH_COUNT.load(Ordering::Relaxed)
}

/// Visit every live PCB (used by the shell's `ps`).
pub fn for_each_process<F: FnMut(&Pcb)>(f: F) {
    arch::without_interrupts(|| SCHEDULER.lock().table().for_each(f));
}

/// Idle thread body: consume deferred reschedules and sleep the CPU.
fn idle_main() {
    loop {
        check_reschedule();
        arch::halt();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::config::MIN_STACK;

    fn worker() {}

    /// Fresh scheduler with idle + bootstrap, mirroring `init()`.
    fn started() -> Scheduler {
        let mut sched = Scheduler::new();
        let boot = sched.start().expect("start on empty table");
        assert_eq!(boot, ProcessId(2));
        sched
    }

    #[test]
    fn test_start_creates_idle_as_pid_one() {
        let sched = started();
        let idle = sched.table().get(ProcessId::IDLE).expect("idle exists");
        assert_eq!(idle.name, "idle");
        assert_eq!(idle.state, ProcessState::Ready);
        assert_eq!(sched.current_pid(), ProcessId(2));
    }

    #[test]
    fn test_round_robin_prefers_non_idle() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "worker", MIN_STACK)
            .expect("slot free");

        // With the worker ready, N passes never pick idle.
        for _ in 0..10 {
            let plan = sched.prepare_switch();
            let running = sched.current_pid();
            assert_ne!(running, ProcessId::IDLE, "idle picked while a worker was ready");
            assert!(running == w || running == ProcessId(2));
            let _ = plan;
        }
    }

    #[test]
    fn test_idle_fallback_when_rotation_dry() {
        let mut sched = started();
        // Block the bootstrap context: only idle remains.
        let boot = sched.current_pid();
        sched.block(boot).expect("boot is live");
        let plan = sched.prepare_switch().expect("switch to idle");
        assert_eq!(sched.current_pid(), ProcessId::IDLE);
        assert!(plan.new_esp != 0);
    }

    #[test]
    fn test_same_pick_means_no_switch() {
        let mut sched = started();
        // Nothing but bootstrap is runnable (idle is only a fallback), so
        // scheduling keeps the current process without a plan.
        let plan = sched.prepare_switch();
        assert!(plan.is_none());
        assert_eq!(sched.current_pid(), ProcessId(2));
        let pcb = sched.table().get(ProcessId(2)).expect("live");
        assert_eq!(pcb.state, ProcessState::Running);
    }

    #[test]
    fn test_switch_plan_wires_esp_and_eip() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "worker", MIN_STACK)
            .expect("slot free");
        let w_esp = sched.table().get(w).expect("live").saved_esp;

        // First pass re-picks the bootstrap (rotation starts after the
        // idle slot); the second lands on the worker.
        assert!(sched.prepare_switch().is_none());
        let plan = sched.prepare_switch().expect("worker picked");
        assert_eq!(plan.new_esp, w_esp);
        assert_eq!(plan.new_eip, worker as usize);
        // The suspended bootstrap resumes at the resume label.
        let boot = sched.table().get(ProcessId(2)).expect("live");
        assert_eq!(boot.saved_eip, resume_eip());
        assert_eq!(boot.state, ProcessState::Ready);
    }

    #[test]
    fn test_exit_makes_pid_unschedulable() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "worker", MIN_STACK)
            .expect("slot free");
        assert!(sched.prepare_switch().is_none());
        sched.prepare_switch().expect("switch to worker");
        assert_eq!(sched.current_pid(), w);

        sched.exit_current(0).expect("worker may exit");
        // The next pass never lands on the dead pid.
        for _ in 0..5 {
            let _ = sched.prepare_switch();
            assert_ne!(sched.current_pid(), w);
        }
        // The dead slot is reclaimed no later than the next create.
        let next = sched
            .create(worker as usize, "reuser", MIN_STACK)
            .expect("slot reclaimed");
        assert_eq!(next, w);
    }

    #[test]
    fn test_exit_refused_for_idle() {
        let mut sched = started();
        let boot = sched.current_pid();
        sched.block(boot).expect("boot live");
        sched.prepare_switch().expect("idle takes over");
        assert_eq!(sched.current_pid(), ProcessId::IDLE);
        assert!(sched.exit_current(0).is_err());
    }

    #[test]
    fn test_kill_semantics() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "victim", MIN_STACK)
            .expect("slot free");

        assert!(matches!(
            sched.kill(ProcessId::KERNEL),
            Err(SchedError::KillRefused { .. })
        ));
        assert!(matches!(
            sched.kill(ProcessId::IDLE),
            Err(SchedError::KillRefused { .. })
        ));

        sched.kill(w).expect("victim is live and not running");
        assert!(sched.table().get(w).is_none());
        assert!(matches!(
            sched.kill(w),
            Err(SchedError::InvalidPid { .. })
        ));
    }

    #[test]
    fn test_quantum_raises_deferred_flag() {
        let mut sched = started();
        RESCHEDULE_REQUESTED.store(false, Ordering::Release);
        for _ in 0..DEFAULT_QUANTUM {
            sched.timer_tick();
        }
        assert!(RESCHEDULE_REQUESTED.load(Ordering::Acquire));
        // Consuming the flag mirrors check_reschedule.
        assert!(RESCHEDULE_REQUESTED.swap(false, Ordering::AcqRel));
    }

    #[test]
    fn test_canary_corruption_terminates_current() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "clumsy", MIN_STACK)
            .expect("slot free");
        assert!(sched.prepare_switch().is_none());
        sched.prepare_switch().expect("switch to worker");
        assert_eq!(sched.current_pid(), w);

        let base = sched.table().get(w).expect("live").stack_base;
        unsafe { (base as *mut u32).write_volatile(0xBAD0_BAD0) };

        let _ = sched.prepare_switch();
        let pcb = sched.table().get(w);
        assert!(
            pcb.is_none() || pcb.expect("checked").state == ProcessState::Terminated,
            "canary corruption must terminate the victim"
        );
    }

    #[test]
    fn test_block_unblock_roundtrip() {
        let mut sched = started();
        let w = sched
            .create(worker as usize, "sleeper", MIN_STACK)
            .expect("slot free");
        sched.block(w).expect("live");
        assert_eq!(
            sched.table().get(w).expect("live").state,
            ProcessState::Blocked
        );
        // Blocked processes are never picked.
        let boot = sched.current_pid();
        sched.block(boot).expect("live");
        sched.prepare_switch().expect("idle fallback");
        assert_eq!(sched.current_pid(), ProcessId::IDLE);

        sched.unblock(w).expect("live");
        sched.prepare_switch().expect("worker picked");
        assert_eq!(sched.current_pid(), w);
    }
}
