//! Integration tests for platform-to-backend resolution.

mod common;

use brig_core::build::{resolve_drivers, DriverPair, Resolution};
use brig_core::progress::channel;
use brig_core::{BrigError, DriverInfo, Options, Platform, ProgressWriter, Result};
use common::{node, MockClient, MockDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn requests(entries: &[(&str, Vec<Platform>)]) -> HashMap<String, Options> {
    entries
        .iter()
        .map(|(name, platforms)| {
            (name.to_string(), Options { platforms: platforms.clone(), ..Default::default() })
        })
        .collect()
}

/// Resolve with a fresh cancellation scope and no preflight checks.
async fn resolve(
    drivers: &[DriverInfo],
    opts: &HashMap<String, Options>,
    pw: &ProgressWriter,
) -> Result<Resolution> {
    resolve_drivers(drivers, opts, pw, &CancellationToken::new(), |_| Ok(())).await
}

fn mock() -> Arc<MockDriver> {
    Arc::new(MockDriver::new(MockClient::new("sha256:abc")))
}

#[tokio::test]
async fn test_single_backend_takes_everything() {
    let d0 = mock();
    let drivers = vec![node("only", &d0, vec![Platform::linux_amd64()])];
    let opts =
        requests(&[("app", vec![Platform::linux_arm64(), Platform::new("linux", "riscv64")])]);

    let (pw, _) = channel();
    let res = resolve(&drivers, &opts, &pw).await.unwrap();

    assert_eq!(
        res.pairs["app"],
        vec![DriverPair {
            driver_index: 0,
            platforms: vec![Platform::linux_arm64(), Platform::new("linux", "riscv64")],
        }]
    );
    assert_eq!(d0.boots(), 1);
    assert!(res.client(0).is_ok());
}

#[tokio::test]
async fn test_no_platforms_boots_only_first_backend() {
    let (d0, d1, d2) = (mock(), mock(), mock());
    let drivers = vec![
        node("a", &d0, vec![Platform::linux_amd64()]),
        node("b", &d1, vec![Platform::linux_arm64()]),
        node("c", &d2, vec![]),
    ];
    let opts = requests(&[("web", vec![]), ("docs", vec![])]);

    let (pw, _) = channel();
    let res = resolve(&drivers, &opts, &pw).await.unwrap();

    assert_eq!(res.driver_indexes(), vec![0]);
    assert_eq!((d0.boots(), d1.boots(), d2.boots()), (1, 0, 0));
    assert!(res.client(1).is_err());
}

#[tokio::test]
async fn test_advertised_platforms_skip_discovery() {
    let (d0, d1, d2) = (mock(), mock(), mock());
    let drivers = vec![
        node("amd", &d0, vec![Platform::linux_amd64()]),
        node("arm", &d1, vec![Platform::linux_arm64()]),
        node("s390x", &d2, vec![Platform::new("linux", "s390x")]),
    ];
    let opts = requests(&[
        ("app", vec![Platform::linux_amd64(), Platform::linux_arm64()]),
        ("tool", vec![Platform::new("linux", "x86_64")]),
    ]);

    let observed = d0.clone();
    let (pw, _) = channel();
    let res = resolve_drivers(&drivers, &opts, &pw, &CancellationToken::new(), |pairs| {
        assert_eq!(observed.boots(), 0, "preflight must run before booting");
        assert_eq!(pairs.len(), 2);
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(
        res.pairs["app"],
        vec![
            DriverPair { driver_index: 0, platforms: vec![Platform::linux_amd64()] },
            DriverPair { driver_index: 1, platforms: vec![Platform::linux_arm64()] },
        ]
    );
    assert_eq!(res.pairs["tool"][0].driver_index, 0);
    assert_eq!(res.driver_indexes(), vec![0, 1]);
    assert_eq!((d0.boots(), d1.boots(), d2.boots()), (1, 1, 0));
}

#[tokio::test]
async fn test_unadvertised_platform_triggers_discovery() {
    let d0 = Arc::new(MockDriver::new(
        MockClient::new("sha256:a").with_workers(vec![Platform::linux_amd64()]),
    ));
    let d1 = Arc::new(MockDriver::new(
        MockClient::new("sha256:b")
            .with_workers(vec![Platform::linux_arm64(), Platform::linux_amd64()]),
    ));
    let drivers =
        vec![node("amd", &d0, vec![Platform::linux_amd64()]), node("unknown", &d1, vec![])];
    let arm_v7 = Platform::new("linux", "arm").with_variant("v7");
    let opts = requests(&[(
        "app",
        vec![Platform::linux_amd64(), Platform::linux_arm64(), arm_v7.clone()],
    )]);

    let (pw, _) = channel();
    let res = resolve(&drivers, &opts, &pw).await.unwrap();

    assert_eq!((d0.boots(), d1.boots()), (1, 1));
    assert_eq!(
        res.pairs["app"],
        vec![
            DriverPair { driver_index: 0, platforms: vec![Platform::linux_amd64(), arm_v7] },
            DriverPair { driver_index: 1, platforms: vec![Platform::linux_arm64()] },
        ]
    );
}

#[tokio::test]
async fn test_preflight_error_aborts_before_boot() {
    let (d0, d1) = (mock(), mock());
    let drivers = vec![
        node("a", &d0, vec![Platform::linux_amd64()]),
        node("b", &d1, vec![Platform::linux_arm64()]),
    ];
    let opts = requests(&[("app", vec![Platform::linux_arm64()])]);

    let (pw, _) = channel();
    let cancel = CancellationToken::new();
    let result =
        resolve_drivers(&drivers, &opts, &pw, &cancel, |_| Err(BrigError::NoImageStore)).await;

    assert!(matches!(result, Err(BrigError::NoImageStore)));
    assert_eq!((d0.boots(), d1.boots()), (0, 0));
}

#[tokio::test]
async fn test_empty_driver_list() {
    let (pw, _) = channel();
    let result = resolve(&[], &HashMap::new(), &pw).await;
    assert!(matches!(result, Err(BrigError::NoDriverConfigured)));
}
