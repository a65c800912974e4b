/// Identity of a logical processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u16);

impl CpuId {
    #[inline]
    pub const fn new(id: u16) -> Self {
        CpuId(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Snapshot of the interrupted context, handed to every timer event.
///
/// The profiling event uses `user_mode`/`pc` to attribute samples; everything
/// else only cares about `cpu`.
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub cpu: CpuId,
    pub user_mode: bool,
    pub pc: u64,
}

impl InterruptFrame {
    /// A frame for an interrupt taken while `cpu` ran kernel code.
    pub const fn kernel(cpu: CpuId) -> Self {
        InterruptFrame {
            cpu,
            user_mode: false,
            pc: 0,
        }
    }

    pub const fn user(cpu: CpuId, pc: u64) -> Self {
        InterruptFrame {
            cpu,
            user_mode: true,
            pc,
        }
    }
}
