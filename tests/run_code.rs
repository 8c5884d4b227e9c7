use std::collections::BTreeSet;

use evm_core::{
    Exception, Fork, Halt, MemoryState, Outcome, RunCodeOpts, Vm,
    common::{Word, account::Account, address::Address},
    tracer::{EventData, LoggingTracer},
};
use pretty_assertions::assert_eq;

const CONTRACT: Address = Address::low(0xaa);
const OTHER: Address = Address::low(0xbb);

fn word(value: u64) -> Vec<u8> {
    Word::from(value).into_bytes().to_vec()
}

#[tokio::test]
async fn test_stop_with_defaults() -> eyre::Result<()> {
    let mut vm = Vm::new(MemoryState::new());
    let opts = RunCodeOpts::new().with_code(vec![0x00]).with_gas_limit(1000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Stop));
    assert_eq!(result.gas_used, 0);
    assert!(result.return_value.as_bytes().is_empty());
    assert!(result.logs.is_empty());
    assert!(result.selfdestruct.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_runs_are_deterministic() -> eyre::Result<()> {
    // PUSH1 1 PUSH1 0 SSTORE CALLER PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = hex::decode("60016000553360005260206000f3")?;
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_caller(Address::low(0x11))
        .with_address(CONTRACT)
        .with_gas_limit(100_000);

    let mut results = Vec::new();
    for _ in 0..2 {
        let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::London);
        results.push(vm.run_code(opts.clone()).await?);
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].return_value.as_bytes(), word(0x11).as_slice());
    Ok(())
}

#[tokio::test]
async fn test_gas_used_never_decreases() -> eyre::Result<()> {
    // Count down from 5:
    // PUSH1 5 JUMPDEST PUSH1 1 SWAP1 SUB DUP1 PUSH1 2 JUMPI STOP
    let code = hex::decode("60055b600190038060025700")?;
    let limit = 1000;
    let mut vm = Vm::new(MemoryState::new());
    let opts = RunCodeOpts::new().with_code(code).with_gas_limit(limit);
    let (result, events) = vm.trace_code(opts, LoggingTracer::default()).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Stop));
    assert_eq!(result.gas_used, 3 + 5 * 26);

    let used = events
        .iter()
        .filter_map(|event| match event.data {
            EventData::Step { gas_used, .. } => Some(gas_used),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(used.len(), 1 + 5 * 7 + 1);
    assert!(used.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(used.iter().all(|gas| *gas <= limit));
    Ok(())
}

#[tokio::test]
async fn test_out_of_gas_discards_writes() -> eyre::Result<()> {
    // PUSH1 1 PUSH1 0 SSTORE PUSH1 0
    let code = hex::decode("60016000556000")?;
    let mut vm = Vm::new(MemoryState::new());
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_gas_limit(20_008);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Faulted(Exception::OutOfGas));
    assert_eq!(result.gas_used, 20_008);
    assert_eq!(vm.state().slot(&CONTRACT, &Word::zero()), Word::zero());
    Ok(())
}

#[tokio::test]
async fn test_static_run_cannot_write() -> eyre::Result<()> {
    let code = hex::decode("6001600055")?;
    let mut vm = Vm::new(MemoryState::new());
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_static(true)
        .with_gas_limit(50_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(
        result.exception(),
        Some(&Exception::StaticStateChangeViolation)
    );
    assert_eq!(result.gas_used, 50_000);
    assert_eq!(vm.state().slot(&CONTRACT, &Word::zero()), Word::zero());
    Ok(())
}

#[tokio::test]
async fn test_failed_sub_call_leaves_parent_intact() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    // PUSH1 0x2a PUSH1 0 MSTORE
    // CALL(gas=0xffff, OTHER, 0, 0, 0, 0, 0)
    // PUSH1 32 MSTORE PUSH1 64 PUSH1 0 RETURN
    let code = hex::decode(
        "602a600052\
         6000600060006000600060bb61fffff1\
         60205260406000f3",
    )?;
    let state = MemoryState::new().with_code(OTHER, vec![0xfe]);
    let mut vm = Vm::new(state);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_gas_limit(1_000_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    let mut expected = word(0x2a);
    expected.extend(word(0));
    assert_eq!(result.return_value.as_bytes(), expected.as_slice());
    // the child burns exactly the 0xffff it was offered
    assert_eq!(result.gas_used, 33 + 700 + 0xffff + 15);
    Ok(())
}

#[tokio::test]
async fn test_create2_address() -> eyre::Result<()> {
    // PUSH5 <PUSH1 1 PUSH1 0 RETURN> PUSH1 0 MSTORE
    // CREATE2(value=0, offset=27, size=5, salt=1)
    // PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = hex::decode(
        "6460016000f3600052\
         60016005601b6000f5\
         60005260206000f3",
    )?;
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Cancun);
    let opts = RunCodeOpts::new().with_code(code).with_address(CONTRACT);
    let result = vm.run_code(opts).await?;
    assert!(result.is_success());

    let init = hex::decode("60016000f3")?;
    let created = CONTRACT.create2(&Word::one(), &init);
    assert_eq!(
        result.return_value.as_bytes(),
        created.as_word().into_bytes().as_slice()
    );
    let deployed = vm.state().get(&created).map(|state| state.code.clone());
    assert_eq!(deployed, Some(vec![0x00]));
    Ok(())
}

#[tokio::test]
async fn test_selfdestruct_set_grows() -> eyre::Result<()> {
    // PUSH1 0xbb SELFDESTRUCT
    let code = hex::decode("60bbff")?;
    let state = MemoryState::new().with_balance(CONTRACT, Word::from(3u64));
    let mut vm = Vm::new(state);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_selfdestruct(BTreeSet::from([Address::low(0x01)]))
        .with_gas_limit(100_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::SelfDestruct));
    assert_eq!(
        result.selfdestruct,
        BTreeSet::from([Address::low(0x01), CONTRACT])
    );
    assert_eq!(result.gas_used, 3 + 5000 + 25_000);
    assert_eq!(result.gas_refund, 24_000);
    assert_eq!(vm.state().balance(&OTHER), Word::from(3u64));
    assert_eq!(vm.state().balance(&CONTRACT), Word::zero());
    Ok(())
}

#[tokio::test]
async fn test_call_at_depth_limit_pushes_zero() -> eyre::Result<()> {
    // CALL(gas=0xffff, OTHER, 0, 0, 0, 0, 0)
    // PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = hex::decode(
        "6000600060006000600060bb61fffff1\
         60005260206000f3",
    )?;
    let state = MemoryState::new().with_code(OTHER, vec![0x00]);
    let mut vm = Vm::new(state).with_fork(Fork::Petersburg);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_depth(1024)
        .with_gas_limit(100_000);
    let (result, events) = vm.trace_code(opts, LoggingTracer::default()).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(result.return_value.as_bytes(), word(0).as_slice());
    // the offered gas comes back untouched
    assert_eq!(result.gas_used, 21 + 700 + 9 + 6);
    let calls = events
        .iter()
        .filter(|event| matches!(event.data, EventData::Call { .. }))
        .count();
    assert_eq!(calls, 1);
    Ok(())
}

#[tokio::test]
async fn test_create_at_depth_limit_pushes_zero() -> eyre::Result<()> {
    // CREATE(value=0, offset=0, size=0)
    // PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = hex::decode("600060006000f060005260206000f3")?;
    let mut vm = Vm::new(MemoryState::new()).with_fork(Fork::Petersburg);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_depth(1024)
        .with_gas_limit(100_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(result.return_value.as_bytes(), word(0).as_slice());
    assert_eq!(result.gas_used, 9 + 32_000 + 9 + 6);
    let nonce = vm.state().get(&CONTRACT).map_or(0, |state| state.account.nonce);
    assert_eq!(nonce, 0);
    Ok(())
}

#[tokio::test]
async fn test_create_with_exhausted_nonce_pushes_zero() -> eyre::Result<()> {
    let code = hex::decode("600060006000f060005260206000f3")?;
    let account = Account {
        nonce: u64::MAX,
        ..Default::default()
    };
    let state = MemoryState::new().with_account(CONTRACT, account);
    let mut vm = Vm::new(state).with_fork(Fork::Petersburg);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_gas_limit(100_000);
    let result = vm.run_code(opts).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
    assert_eq!(result.return_value.as_bytes(), word(0).as_slice());
    assert_eq!(result.gas_used, 9 + 32_000 + 9 + 6);
    let nonce = vm.state().get(&CONTRACT).map(|state| state.account.nonce);
    assert_eq!(nonce, Some(u64::MAX));
    Ok(())
}

#[tokio::test]
async fn test_static_child_cannot_write() -> eyre::Result<()> {
    // STATICCALL(gas=0xffff, OTHER, 0, 0, 0, 0)
    // PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = hex::decode(
        "600060006000600060bb61fffffa\
         60005260206000f3",
    )?;
    // PUSH1 1 PUSH1 0 SSTORE, then PUSH1 0 PUSH1 0 LOG0
    for child in ["6001600055", "60006000a0"] {
        let state = MemoryState::new().with_code(OTHER, hex::decode(child)?);
        let mut vm = Vm::new(state).with_fork(Fork::Petersburg);
        let opts = RunCodeOpts::new()
            .with_code(code.clone())
            .with_address(CONTRACT)
            .with_gas_limit(1_000_000);
        let result = vm.run_code(opts).await?;

        assert_eq!(result.outcome, Outcome::Halted(Halt::Return));
        assert_eq!(result.return_value.as_bytes(), word(0).as_slice());
        // the faulted child burns everything it was offered
        assert_eq!(result.gas_used, 18 + 700 + 0xffff + 15);
        assert!(result.logs.is_empty());
        assert_eq!(vm.state().slot(&OTHER, &Word::zero()), Word::zero());
    }
    Ok(())
}

#[tokio::test]
async fn test_recursion_reaches_depth_limit() -> eyre::Result<()> {
    // CALL(GAS, ADDRESS, 0, 0, 0, 0, 0) STOP
    let code = hex::decode("60006000600060006000305af100")?;
    let state = MemoryState::new().with_code(CONTRACT, code.clone());
    let mut vm = Vm::new(state).with_fork(Fork::Petersburg);
    let opts = RunCodeOpts::new()
        .with_code(code)
        .with_address(CONTRACT)
        .with_gas_limit(10_000_000_000_000);
    let (result, events) = vm.trace_code(opts, LoggingTracer::default()).await?;

    assert_eq!(result.outcome, Outcome::Halted(Halt::Stop));
    let depths = events
        .iter()
        .filter(|event| matches!(event.data, EventData::Call { .. }))
        .map(|event| event.depth)
        .collect::<Vec<_>>();
    assert_eq!(depths.len(), 1025);
    assert_eq!(depths.iter().max(), Some(&1024));
    let exits = events
        .iter()
        .filter(|event| matches!(event.data, EventData::Exit { .. }))
        .count();
    assert_eq!(exits, 1025);
    Ok(())
}
