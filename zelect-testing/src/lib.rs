pub mod fault_injection;
pub mod scenarios;

pub use fault_injection::{
    create_test_scenarios, ElectionTestHarness, ExpectedOutcome, FaultType, LeaderRecord,
    TestResult, TestScenario,
};
pub use scenarios::{
    create_failover_tests, print_failover_summary, run_all_failover_tests, run_failover_test,
    FailoverResult, FailoverTest,
};
