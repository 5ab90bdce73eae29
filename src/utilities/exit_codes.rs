//! Process exit codes. The enumeration is dense and stable: scripts driving
//! the CLI match on these numbers, so variants must never be renumbered.
//! Codes 1, 2 and 10 have no trigger in safe Rust (raw copies and
//! allocations either succeed or abort) but stay reserved so the numbering
//! of the codes that can fire does not shift.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    MemcpyFailure = 1,
    CannotAllocatePairwiseDistArray = 2,
    MedoidFindingError = 3,
    CannotWriteAverages = 4,
    CannotWriteMembership = 5,
    CannotWritePath = 6,
    CannotReadAverages = 7,
    CannotReadMembership = 8,
    UnknownAlgoMode = 9,
    PrefixChoppedZeroLengthCopyFailure = 10,
    CannotReadInput = 11,
    CannotWriteDistanceMatrix = 12,
    UnknownEngine = 13,
    ReservedCutoff = 14,
    DbaUpdateFailed = 15,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dense_and_stable() {
        let all = [
            ExitCode::Success,
            ExitCode::MemcpyFailure,
            ExitCode::CannotAllocatePairwiseDistArray,
            ExitCode::MedoidFindingError,
            ExitCode::CannotWriteAverages,
            ExitCode::CannotWriteMembership,
            ExitCode::CannotWritePath,
            ExitCode::CannotReadAverages,
            ExitCode::CannotReadMembership,
            ExitCode::UnknownAlgoMode,
            ExitCode::PrefixChoppedZeroLengthCopyFailure,
            ExitCode::CannotReadInput,
            ExitCode::CannotWriteDistanceMatrix,
            ExitCode::UnknownEngine,
            ExitCode::ReservedCutoff,
            ExitCode::DbaUpdateFailed,
        ];
        for (expected, code) in all.iter().enumerate() {
            assert_eq!(code.code(), expected as i32);
        }
    }
}
