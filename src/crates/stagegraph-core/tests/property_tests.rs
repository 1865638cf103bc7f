//! Property tests for scheduling-order independence
//!
//! A splitter fans one message out to `n` branches; each branch either
//! outputs, errors, or routes through an extra hop first. Whatever the
//! schedule, the multiset of outputs and errors must be the same.

use proptest::prelude::*;
use stagegraph_core::{
    from_fn, Engine, EngineConfig, Graph, GraphBuilder, RunResult, RunState, StageSpec,
};

#[derive(Debug, Clone, Copy)]
enum Branch {
    Output,
    Error,
    TwoHops,
}

fn branch_strategy() -> impl Strategy<Value = Branch> {
    prop_oneof![
        Just(Branch::Output),
        Just(Branch::Error),
        Just(Branch::TwoHops),
    ]
}

fn build(branches: &[Branch]) -> Graph {
    let mut b = GraphBuilder::new();
    b.add_stage(StageSpec::new(
        "split",
        from_fn(|n: u32, ctx| async move { ctx.send_to_next(n) }).emits::<u32>(),
    ))
    .unwrap();

    for (i, branch) in branches.iter().enumerate() {
        let id = format!("b{}", i);
        let tag = i as u32;
        let spec = match branch {
            Branch::Output => StageSpec::new(
                id.clone(),
                from_fn(move |n: u32, ctx| async move { ctx.send_output(n * 100 + tag) }),
            ),
            Branch::Error => StageSpec::new(
                id.clone(),
                from_fn(move |_: u32, ctx| async move {
                    ctx.send_error(format!("branch {} failed", tag))
                }),
            ),
            Branch::TwoHops => StageSpec::new(
                id.clone(),
                from_fn(move |n: u32, ctx| async move {
                    ctx.send_to_next(format!("{}:{}", tag, n))
                })
                .emits::<String>(),
            ),
        };
        b.add_stage(spec).unwrap();
        b.add_edge_for::<u32>("split", id.clone()).unwrap();

        if let Branch::TwoHops = branch {
            let hop = format!("{}-hop", id);
            b.add_stage(StageSpec::new(
                hop.clone(),
                from_fn(|s: String, ctx| async move { ctx.send_output(s.len() as u32) }),
            ))
            .unwrap();
            b.add_edge_for::<String>(id, hop).unwrap();
        }
    }

    b.build().unwrap()
}

/// Outputs and errors as sorted, comparable lists
fn multiset(result: &RunResult) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut outputs: Vec<(String, String)> = result
        .terminal_outputs
        .iter()
        .map(|o| (o.stage.clone(), format!("{:?}", o.message)))
        .collect();
    let mut errors: Vec<(String, String)> = result
        .errors
        .iter()
        .map(|f| (f.stage.clone(), f.error.to_string()))
        .collect();
    outputs.sort();
    errors.sort();
    (outputs, errors)
}

fn run(graph: &Graph, config: EngineConfig, input: u32) -> RunResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = Engine::new(graph.clone()).with_config(config).unwrap();
    runtime.block_on(engine.run(input))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn fan_out_result_is_schedule_independent(
        branches in prop::collection::vec(branch_strategy(), 1..8),
        input in 0u32..1000,
        width in 1usize..6,
    ) {
        let graph = build(&branches);
        let sequential = run(&graph, EngineConfig::sequential(), input);
        let concurrent = run(&graph, EngineConfig::concurrent(width), input);

        prop_assert_eq!(sequential.final_state, RunState::Completed);
        prop_assert_eq!(concurrent.final_state, RunState::Completed);
        prop_assert_eq!(multiset(&sequential), multiset(&concurrent));

        let expected_errors = branches.iter().filter(|b| matches!(b, Branch::Error)).count();
        prop_assert_eq!(sequential.errors.len(), expected_errors);
        prop_assert_eq!(sequential.terminal_outputs.len(), branches.len() - expected_errors);
    }

    #[test]
    fn sequential_runs_are_reproducible(
        branches in prop::collection::vec(branch_strategy(), 1..8),
        input in 0u32..1000,
    ) {
        let graph = build(&branches);
        let first = run(&graph, EngineConfig::sequential(), input);
        let second = run(&graph, EngineConfig::sequential(), input);

        prop_assert_eq!(
            format!("{:?}", first.terminal_outputs),
            format!("{:?}", second.terminal_outputs)
        );
        prop_assert_eq!(first.errors, second.errors);
        prop_assert_eq!(first.invocations, second.invocations);
    }
}
