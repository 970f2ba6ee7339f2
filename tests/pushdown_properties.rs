//! Pushdown pass properties checked end to end against the reference interpreter.


use sieve_core::config::PushdownConfig;
use sieve_core::dag::{JoinType, Op, PlanGraph};
use sieve_core::expr::{Expr, Func};
use sieve_planner::{optimize, push_down_predicates};
use test_plans::*;

fn all_configs() -> Vec<PushdownConfig> {
    let mut configs = Vec::new();
    for storage_pushdown in [true, false] {
        for remove_redundant_filters in [true, false] {
            configs.push(PushdownConfig {
                storage_pushdown,
                remove_redundant_filters,
                ..Default::default()
            });
        }
    }
    configs
}

#[test]
fn test_join_plans_keep_their_rows() {
    let tables = users_orders();
    for join_type in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
        for storage in [false, true] {
            for config in all_configs() {
                let plan = join_plan(join_type, storage);
                let out = assert_equivalent(&plan.graph, &tables, &config);
                assert_single_alias(&out.report);
            }
        }
    }
}

#[test]
fn test_single_input_plans_keep_their_rows() {
    let tables = users_orders();
    for config in all_configs() {
        for graph in [
            select_plan().0,
            limit_plan().0,
            shared_scan_plan().0,
            lateral_plan().0,
            reduce_plan().0,
        ] {
            let out = assert_equivalent(&graph, &tables, &config);
            assert_single_alias(&out.report);
        }
    }
}

#[test]
fn test_semi_join_keeps_its_rows() {
    let tables = users_orders();
    let mut g = PlanGraph::new();
    let u = g.scan("users", "u", int_schema(&["id", "age"])).unwrap();
    let o = g.scan("orders", "o", int_schema(&["uid", "total"])).unwrap();
    let on = Expr::binary(col("u", "id"), Func::Eq, col("o", "uid"))
        .and(cmp("o", "total", Func::Gt, 50))
        .and(cmp("u", "age", Func::Lt, 50));
    let semi = g.join(vec![u, o], JoinType::LeftSemi, Some(on)).unwrap();
    let f = g.filter(semi, cmp("u", "id", Func::GtEq, 2)).unwrap();
    g.add_root(f).unwrap();

    let out = assert_equivalent(&g, &tables, &PushdownConfig::default());
    let state = |op| {
        out.report
            .state(op)
            .unwrap()
            .exprs()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(state(u), vec!["u.id >= 2", "u.age < 50"]);
    assert_eq!(state(o), vec!["o.total > 50"]);
}

#[test]
fn test_pass_is_idempotent() {
    let plans = [
        join_plan(JoinType::Inner, false).graph,
        join_plan(JoinType::Left, true).graph,
        join_plan(JoinType::Full, false).graph,
        select_plan().0,
        limit_plan().0,
        shared_scan_plan().0,
        lateral_plan().0,
        reduce_plan().0,
    ];
    for config in all_configs() {
        for plan in plans.iter() {
            let once = optimize(plan.clone(), &config).unwrap().plan;
            let twice = optimize(once.clone(), &config).unwrap().plan;
            assert_eq!(
                once.fingerprint(),
                twice.fingerprint(),
                "second run changed\n{}---\n{}",
                once.explain(),
                twice.explain()
            );
        }
    }
}

#[test]
fn test_cross_alias_conjunct_stays_on_the_join_side() {
    let plan = join_plan(JoinType::Inner, false);
    let mut g = plan.graph.clone();
    let report = push_down_predicates(&mut g, &PushdownConfig::default()).unwrap();

    for input in [plan.users, plan.orders] {
        let state = report.state(input).unwrap();
        assert!(state
            .exprs()
            .all(|e| !e.to_string().contains("u.id + o.total")
                && !e.to_string().contains("u.id = o.uid")));
    }
    match &g.node(plan.filter).unwrap().op {
        Op::Filter { predicate } => assert_eq!(predicate.to_string(), "u.id + o.total > 12"),
        other => panic!("expected the residual filter, got {other:?}"),
    }
    match &g.node(plan.join).unwrap().op {
        Op::Join(join) => {
            assert_eq!(join.condition.as_ref().unwrap().to_string(), "u.id = o.uid")
        }
        other => panic!("expected the join, got {other:?}"),
    }
}

#[test]
fn test_nothing_moves_below_a_limit() {
    let (plan, users, limit) = limit_plan();
    let mut g = plan.clone();
    let report = push_down_predicates(&mut g, &PushdownConfig::default()).unwrap();

    assert!(report.state(users).unwrap().is_empty());
    assert_eq!(report.scan(users).unwrap().predicate, None);
    assert_eq!(g.node(limit).unwrap().inputs, vec![users]);
    assert_eq!(g.explain(), plan.explain());
}

#[test]
fn test_select_rewrite_uses_the_computed_expression() {
    let (plan, users, _) = select_plan();
    let mut g = plan.clone();
    let report = push_down_predicates(&mut g, &PushdownConfig::default()).unwrap();

    let pushed: Vec<String> = report
        .state(users)
        .unwrap()
        .exprs()
        .map(|e| e.to_string())
        .collect();
    assert_eq!(pushed, vec!["u.age + 1 > 30", "u.id < 7"]);
    assert!(!pushed.iter().any(|p| p == "u.age > 30"));
}

#[test]
fn test_storage_scans_absorb_everything() {
    let plan = join_plan(JoinType::Inner, true);
    let out = optimize(plan.graph.clone(), &PushdownConfig::default()).unwrap();
    assert_eq!(out.report.filters_synthesized, 0);
    let users = out.report.scan(plan.users).unwrap();
    assert!(users.enforced);
    assert_eq!(
        users.predicate.as_ref().unwrap().to_string(),
        "u.age > 30 AND u.age < 60"
    );
}

#[test]
fn test_unknown_operators_stop_predicates() {
    let mut g = PlanGraph::new();
    let u = g.scan("users", "u", int_schema(&["id", "age"])).unwrap();
    let other = g.other(vec![u], "sample").unwrap();
    let f = g.filter(other, cmp("u", "age", Func::Gt, 30)).unwrap();
    g.add_root(f).unwrap();
    let before = g.explain();

    let out = optimize(g, &PushdownConfig::default()).unwrap();
    assert!(out.fell_back.is_none());
    assert!(out.report.state(u).unwrap().is_empty());
    assert_eq!(out.plan.explain(), before);
}

#[test]
fn test_script_is_a_barrier() {
    let mut g = PlanGraph::new();
    let u = g.scan("users", "u", int_schema(&["id", "age"])).unwrap();
    let s = g
        .script(u, "/bin/cat", "u", int_schema(&["id", "age"]))
        .unwrap();
    let f = g.filter(s, cmp("u", "age", Func::Gt, 30)).unwrap();
    g.add_root(f).unwrap();

    let out = optimize(g, &PushdownConfig::default()).unwrap();
    assert!(out.report.state(u).unwrap().is_empty());
    assert!(out.plan.contains(f));
}

#[test]
fn test_non_deterministic_conjuncts_stay() {
    let mut g = PlanGraph::new();
    let u = g.scan("users", "u", int_schema(&["id", "age"])).unwrap();
    let sample = Expr::binary(Expr::call(Func::Rand, vec![]), Func::Lt, Expr::lit(0.5));
    let f = g
        .filter(u, cmp("u", "age", Func::Gt, 30).and(sample.clone()))
        .unwrap();
    g.add_root(f).unwrap();

    let out = optimize(g, &PushdownConfig::default()).unwrap();
    match &out.plan.node(f).unwrap().op {
        Op::Filter { predicate } => {
            assert!(predicate.conjuncts().contains(&&sample));
        }
        other => panic!("expected filter, got {other:?}"),
    }
    assert_eq!(
        out.report.scan(u).unwrap().predicate.as_ref().unwrap().to_string(),
        "u.age > 30"
    );
}
