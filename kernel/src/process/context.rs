//! Process Context
//!
//! Register frame used for the first entry into user mode.

use crate::config::UserAddr;

/// User code segment selector: GDT index 3, RPL 3.
pub const SEL_UCSEG: u32 = 0x1B;

/// User data segment selector: GDT index 4, RPL 3.
pub const SEL_UDSEG: u32 = 0x23;

/// EFLAGS bit 1, must be set.
pub const FLAG_MBS: u32 = 0x0000_0002;

/// EFLAGS interrupt enable flag.
pub const FLAG_IF: u32 = 0x0000_0200;

/// i386 interrupt frame, as popped by the return-to-user path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserFrame {
    // Pushed by pusha
    /// EDI register
    pub edi: u32,
    /// ESI register
    pub esi: u32,
    /// EBP register
    pub ebp: u32,
    /// Ignored by popa
    pub esp_dummy: u32,
    /// EBX register
    pub ebx: u32,
    /// EDX register
    pub edx: u32,
    /// ECX register
    pub ecx: u32,
    /// EAX register
    pub eax: u32,

    // Segment registers
    /// GS segment
    pub gs: u32,
    /// FS segment
    pub fs: u32,
    /// ES segment
    pub es: u32,
    /// DS segment
    pub ds: u32,

    // Popped by iret
    /// Instruction pointer
    pub eip: UserAddr,
    /// Code segment
    pub cs: u32,
    /// EFLAGS register
    pub eflags: u32,
    /// Stack pointer
    pub esp: UserAddr,
    /// Stack segment
    pub ss: u32,
}

impl UserFrame {
    /// Frame that starts user code at `entry` with stack pointer `esp`,
    /// interrupts enabled and every other register zero.
    pub const fn new_user(entry: UserAddr, esp: UserAddr) -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            gs: SEL_UDSEG,
            fs: SEL_UDSEG,
            es: SEL_UDSEG,
            ds: SEL_UDSEG,
            eip: entry,
            cs: SEL_UCSEG,
            eflags: FLAG_IF | FLAG_MBS,
            esp,
            ss: SEL_UDSEG,
        }
    }

    /// Check if the frame returns to ring 3
    pub fn is_user(&self) -> bool {
        self.cs & 0x3 == 3
    }
}
