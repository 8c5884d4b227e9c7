use std::sync::Arc;

use evm_core::{
    CurveOps, Exception, Fork, Halt, MemoryState, Outcome, PrecompileSet, RunCodeOpts, Vm,
    common::address::Address,
};
use pretty_assertions::assert_eq;

const ECMUL: Address = Address::low(0x07);

const G1_TIMES_2: &str = "030644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd3\
                          15ed738c0e0a7c92e7845f96b2ae9c0a68a6a449e3538fc7ff3ebf7a5a18a2c4";

/// The generator (1, 2) followed by `scalar`.
fn mul_input(scalar: u8) -> Vec<u8> {
    let mut input = vec![0u8; 96];
    input[31] = 1;
    input[63] = 2;
    input[95] = scalar;
    input
}

fn ecmul_opts(data: Vec<u8>, gas_limit: u64) -> RunCodeOpts {
    RunCodeOpts::new()
        .with_address(ECMUL)
        .with_data(data)
        .with_gas_limit(gas_limit)
}

#[tokio::test]
async fn test_ecmul_message() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Istanbul);
    let result = vm.run_code(ecmul_opts(mul_input(2), 10_000)).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(result.gas_used, 6000);
    assert_eq!(hex::encode(result.return_value.as_bytes()), G1_TIMES_2);
    Ok(())
}

#[tokio::test]
async fn test_ecmul_fixed_cost_per_fork() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Byzantium);
    let result = vm.run_code(ecmul_opts(mul_input(2), 40_000)).await?;
    assert!(result.is_success());
    assert_eq!(result.gas_used, 40_000);

    let result = vm.run_code(ecmul_opts(mul_input(2), 39_999)).await?;
    assert_eq!(result.exception(), Some(&Exception::OutOfGas));
    assert_eq!(result.gas_used, 39_999);
    Ok(())
}

#[tokio::test]
async fn test_ecmul_underfunded_whatever_the_input() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Istanbul);
    for data in [mul_input(2), vec![0xff; 96], Vec::new()] {
        let result = vm.run_code(ecmul_opts(data, 5999)).await?;
        assert_eq!(result.outcome, Outcome::Faulted(Exception::OutOfGas));
        assert_eq!(result.gas_used, 5999);
        assert!(result.return_value.as_bytes().is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_ecmul_invalid_point_looks_like_out_of_gas() -> eyre::Result<()> {
    // (1, 3) is not on the curve
    let mut input = mul_input(2);
    input[63] = 3;
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Istanbul);
    let result = vm.run_code(ecmul_opts(input, 10_000)).await?;

    assert_eq!(result.outcome, Outcome::Faulted(Exception::OutOfGas));
    assert_eq!(result.gas_used, 10_000);
    Ok(())
}

#[tokio::test]
async fn test_ecmul_short_input_is_zero_padded() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Istanbul);
    // point and scalar are all zeros: the point at infinity
    let result = vm.run_code(ecmul_opts(vec![0u8; 10], 6000)).await?;
    assert!(result.is_success());
    assert_eq!(result.return_value.as_bytes(), &[0u8; 64][..]);

    // 64 bytes of point and no scalar: G * 0
    let result = vm.run_code(ecmul_opts(mul_input(0)[..64].to_vec(), 6000)).await?;
    assert!(result.is_success());
    assert_eq!(result.return_value.as_bytes(), &[0u8; 64][..]);
    Ok(())
}

#[tokio::test]
async fn test_ecmul_from_bytecode() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    // CALLDATACOPY(0, 0, 96)
    // STATICCALL(GAS, 0x07, 0, 96, 96, 64) POP
    // RETURN(96, 64)
    let code = hex::decode(
        "60606000600037\
         604060606060600060075afa50\
         60406060f3",
    )?;
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Istanbul);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_data(mul_input(2))
        .with_gas_limit(100_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(hex::encode(result.return_value.as_bytes()), G1_TIMES_2);
    Ok(())
}

/// Answers one byte short for every multiplication.
struct ShortCurve;

impl CurveOps for ShortCurve {
    fn add(&self, _: &[u8; 128]) -> Vec<u8> {
        vec![0u8; 64]
    }

    fn mul(&self, _: &[u8; 96]) -> Vec<u8> {
        vec![0u8; 63]
    }

    fn pairing(&self, _: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

#[tokio::test]
async fn test_injected_curve_decides_success_by_length() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new())
        .with_fork(Fork::Istanbul)
        .with_precompiles(PrecompileSet::new(Arc::new(ShortCurve)));
    let result = vm.run_code(ecmul_opts(mul_input(2), 10_000)).await?;

    assert_eq!(result.outcome, Outcome::Faulted(Exception::OutOfGas));
    assert_eq!(result.gas_used, 10_000);
    Ok(())
}

#[tokio::test]
async fn test_identity_return_data() -> eyre::Result<()> {
    // CALLDATACOPY(0, 0, 4)
    // CALL(GAS, 0x04, 0, 0, 4, 0, 0) POP
    // RETURNDATACOPY(0, 0, RETURNDATASIZE) RETURN(0, RETURNDATASIZE)
    let code = hex::decode(
        "60046000600037\
         60006000600460006000600461fffff150\
         3d600060003e3d6000f3",
    )?;
    let mut vm = Vm::new(MemoryState::new());
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_data(vec![1, 2, 3, 4])
        .with_gas_limit(100_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(result.return_value.as_bytes(), &[1u8, 2, 3, 4][..]);
    Ok(())
}
