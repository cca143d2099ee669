use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quota_hub::bench_support::{QuotaBenchFixture, BENCH_ORGANIZATION};
use quota_hub_governor::allocation::{AllocationMode, ResourceCaps};

const DEPARTMENTS: usize = 8;
const MEMBERS_PER_DEPARTMENT: usize = 4;

fn bench_allocation_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_validation");
    group
        .sample_size(200)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2));

    let fixture = QuotaBenchFixture::new(DEPARTMENTS, MEMBERS_PER_DEPARTMENT);
    let admin = fixture.admin();
    let department = fixture.departments[0].clone();

    group.bench_function(BenchmarkId::new("set_department", "accepted"), |b| {
        let caps = ResourceCaps {
            max_gateways: Some(1),
            max_workflows: Some(MEMBERS_PER_DEPARTMENT as u64 * 2),
            max_ram_mb: Some(MEMBERS_PER_DEPARTMENT as u64 * 256),
            ..Default::default()
        };
        b.iter(|| {
            let allocation = fixture
                .allocations()
                .set_department_allocation(&admin, &department, caps.clone(), AllocationMode::HardCap)
                .expect("allocation accepted");
            black_box(allocation)
        });
    });

    group.bench_function(BenchmarkId::new("set_department", "rejected"), |b| {
        let caps = ResourceCaps {
            max_gateways: Some(1_000),
            ..Default::default()
        };
        b.iter(|| {
            let err = fixture
                .allocations()
                .set_department_allocation(&admin, &department, caps.clone(), AllocationMode::HardCap)
                .expect_err("pool exceeded");
            black_box(err)
        });
    });

    let (member_department, member) = fixture.members[0].clone();
    group.bench_function(BenchmarkId::new("set_member", "accepted"), |b| {
        let caps = ResourceCaps {
            max_workflows: Some(2),
            ..Default::default()
        };
        b.iter(|| {
            let allocation = fixture
                .allocations()
                .set_member_allocation(
                    &admin,
                    &member_department,
                    &member,
                    caps.clone(),
                    AllocationMode::SoftCap,
                )
                .expect("member allocation accepted");
            black_box(allocation)
        });
    });

    group.finish();
}

fn bench_credit_budget(c: &mut Criterion) {
    let mut group = c.benchmark_group("credit_budget");
    let fixture = QuotaBenchFixture::new(DEPARTMENTS, MEMBERS_PER_DEPARTMENT);
    let department = fixture.departments[0].clone();

    group.bench_function("check_department", |b| {
        b.iter(|| {
            let check = fixture
                .allocations()
                .check_dept_credit_budget(&department, 1.0)
                .expect("credit check");
            black_box(check)
        });
    });

    group.bench_function("record_department", |b| {
        b.iter(|| {
            let recorded = fixture
                .allocations()
                .record_dept_credit_usage(&department, 0.01)
                .expect("credit record");
            black_box(recorded)
        });
    });

    group.finish();
}

fn bench_status_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("status_aggregation");
    group.measurement_time(Duration::from_secs(10));

    let fixture = QuotaBenchFixture::new(DEPARTMENTS, MEMBERS_PER_DEPARTMENT);
    let department = fixture.departments[0].clone();
    let (member_department, member) = fixture.members[0].clone();

    group.bench_function("organization", |b| {
        b.iter(|| {
            black_box(
                fixture
                    .status()
                    .organization_status(BENCH_ORGANIZATION)
                    .expect("organization status"),
            )
        });
    });

    group.bench_function("department", |b| {
        b.iter(|| {
            black_box(
                fixture
                    .status()
                    .department_status(&department)
                    .expect("department status"),
            )
        });
    });

    group.bench_function("member", |b| {
        b.iter(|| {
            black_box(
                fixture
                    .status()
                    .member_status(&member_department, &member)
                    .expect("member status"),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocation_validation,
    bench_credit_budget,
    bench_status_aggregation
);
criterion_main!(benches);
