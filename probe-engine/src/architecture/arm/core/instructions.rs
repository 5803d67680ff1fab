//! AArch32 instruction encoders for instruction-injected debug access.
//!
//! Cortex-A/R cores have no architected register file access from the
//! debug bus; registers and memory are reached by injecting instructions
//! through DBGITR and moving data through the DCC (DBGDTRTX/DBGDTRRX).

/// `MCR p<cp>, <opc1>, R<rt>, c<crn>, c<crm>, <opc2>`
///
/// Move from core register to coprocessor; `MCR p14, 0, Rt, c0, c5, 0`
/// writes Rt into DBGDTRTXint where the debugger can read it.
pub fn build_mcr(cp: u8, opc1: u8, rt: u16, crn: u8, crm: u8, opc2: u8) -> u32 {
    0xEE00_0010
        | (u32::from(opc1) << 21)
        | (u32::from(crn) << 16)
        | (u32::from(rt) << 12)
        | (u32::from(cp) << 8)
        | (u32::from(opc2) << 5)
        | u32::from(crm)
}

/// `MRC p<cp>, <opc1>, R<rt>, c<crn>, c<crm>, <opc2>`
///
/// Move from coprocessor to core register; `MRC p14, 0, Rt, c0, c5, 0`
/// loads Rt from DBGDTRRXint after the debugger wrote it.
pub fn build_mrc(cp: u8, opc1: u8, rt: u16, crn: u8, crm: u8, opc2: u8) -> u32 {
    build_mcr(cp, opc1, rt, crn, crm, opc2) | (1 << 20)
}

/// `MOV R<rd>, R<rm>`
pub fn build_mov(rd: u16, rm: u16) -> u32 {
    0xE1A0_0000 | (u32::from(rd) << 12) | u32::from(rm)
}

/// `MRS R<rt>, CPSR`
pub fn build_mrs(rt: u16) -> u32 {
    0xE10F_0000 | (u32::from(rt) << 12)
}

/// `MSR CPSR_fsxc, R<rn>`
pub fn build_msr(rn: u16) -> u32 {
    0xE12F_F000 | u32::from(rn)
}

/// `BX R<rm>`
pub fn build_bx(rm: u16) -> u32 {
    0xE12F_FF10 | u32::from(rm)
}

/// `LDC p<cp>, c<crd>, [R<rn>], #<imm>`
///
/// Post-increment load to coprocessor; `LDC p14, c5, [r0], #4` moves the
/// word at `[r0]` into DBGDTRTXint and advances r0.
pub fn build_ldc(cp: u8, crd: u8, rn: u16, imm: u8) -> u32 {
    0xECB0_0000
        | (u32::from(rn) << 16)
        | (u32::from(crd) << 12)
        | (u32::from(cp) << 8)
        | u32::from(imm >> 2)
}

/// `STC p<cp>, c<crd>, [R<rn>], #<imm>`
///
/// Post-increment store from coprocessor; `STC p14, c5, [r0], #4` stores
/// DBGDTRRXint to `[r0]` and advances r0.
pub fn build_stc(cp: u8, crd: u8, rn: u16, imm: u8) -> u32 {
    0xECA0_0000
        | (u32::from(rn) << 16)
        | (u32::from(crd) << 12)
        | (u32::from(cp) << 8)
        | u32::from(imm >> 2)
}

/// `LDRB R<rt>, [R<rn>], #1`
pub fn build_ldrb_postinc(rt: u16, rn: u16) -> u32 {
    0xE4D0_0001 | (u32::from(rn) << 16) | (u32::from(rt) << 12)
}

/// `LDRH R<rt>, [R<rn>], #2`
pub fn build_ldrh_postinc(rt: u16, rn: u16) -> u32 {
    0xE0D0_00B2 | (u32::from(rn) << 16) | (u32::from(rt) << 12)
}

/// `STRB R<rt>, [R<rn>], #1`
pub fn build_strb_postinc(rt: u16, rn: u16) -> u32 {
    0xE4C0_0001 | (u32::from(rn) << 16) | (u32::from(rt) << 12)
}

/// `STRH R<rt>, [R<rn>], #2`
pub fn build_strh_postinc(rt: u16, rn: u16) -> u32 {
    0xE0C0_00B2 | (u32::from(rn) << 16) | (u32::from(rt) << 12)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dcc_transfer_instructions() {
        // MCR p14, 0, r0, c0, c5, 0
        assert_eq!(build_mcr(14, 0, 0, 0, 5, 0), 0xEE00_0E15);
        // MRC p14, 0, r0, c0, c5, 0
        assert_eq!(build_mrc(14, 0, 0, 0, 5, 0), build_mcr(14, 0, 0, 0, 5, 0) | (1 << 20));
    }

    #[test]
    fn ldc_stc_postincrement() {
        // LDC p14, c5, [r0], #4
        assert_eq!(build_ldc(14, 5, 0, 4), 0xECB0_5E01);
        // STC p14, c5, [r0], #4
        assert_eq!(build_stc(14, 5, 0, 4), 0xECA0_5E01);
    }

    #[test]
    fn narrow_memory_instructions() {
        // LDRB r1, [r0], #1
        assert_eq!(build_ldrb_postinc(1, 0), 0xE4D0_1001);
        // LDRH r1, [r0], #2
        assert_eq!(build_ldrh_postinc(1, 0), 0xE0D0_10B2);
        // STRB r1, [r0], #1
        assert_eq!(build_strb_postinc(1, 0), 0xE4C0_1001);
        // STRH r1, [r0], #2
        assert_eq!(build_strh_postinc(1, 0), 0xE0C0_10B2);
    }

    #[test]
    fn register_move_instructions() {
        // MOV r0, pc
        assert_eq!(build_mov(0, 15), 0xE1A0_000F);
        // MRS r0, CPSR
        assert_eq!(build_mrs(0), 0xE10F_0000);
        // MSR CPSR_fsxc, r0
        assert_eq!(build_msr(0), 0xE12F_F000);
        // BX r0
        assert_eq!(build_bx(0), 0xE12F_FF10);
    }
}
