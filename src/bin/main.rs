use evm_core::{
    Fork, MemoryState, RunCodeOpts, Vm,
    decoder::{Bytecode, Decoder},
};

fn dump(decoded: &Bytecode) {
    println!("{:<6} {:<15} Argument", "PC", "OpCode");
    println!("{}", "─".repeat(40));

    for instruction in &decoded.instructions {
        let pc = format!("{:#06x}", instruction.offset);
        let name = instruction.name();
        let argument = instruction
            .argument
            .as_ref()
            .map(|arg| format!("0x{}", hex::encode(arg)))
            .unwrap_or_default();
        println!("{pc:<6} {name:<15} {argument}");
    }

    println!("\n[JUMP TABLE]");
    println!("OFFSET -- INDEX");
    println!("{}", "─".repeat(13 + 4));
    for (offset, index) in &decoded.jumptable {
        println!("{offset:#06x} --- {index}")
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <bytecode> [calldata]", args[0]);
        std::process::exit(1);
    }

    let bytecode = hex::decode(args[1].trim().trim_start_matches("0x"))?;
    let calldata = match args.get(2) {
        Some(data) => hex::decode(data.trim().trim_start_matches("0x"))?,
        None => Vec::new(),
    };

    let fork = match std::env::var("FORK") {
        Ok(name) => name.parse::<Fork>()?,
        Err(_) => Fork::default(),
    };
    let mut opts = RunCodeOpts::new().with_code(bytecode.clone()).with_data(calldata);
    if let Ok(gas) = std::env::var("GAS") {
        opts = opts.with_gas_limit(gas.parse()?);
    }

    dump(&Decoder::decode(&bytecode));

    tracing::info!("running {} bytes of code on {fork}", bytecode.len());
    let mut vm = Vm::new(MemoryState::new()).with_fork(fork);
    let result = vm.run_code(opts).await?;

    println!("\nRESULT:");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
