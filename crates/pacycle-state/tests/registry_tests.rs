use pacycle_state::{CycleBarrier, LifecycleError, PeerEvent, PeerState, SubsystemRegistry};
use uuid::Uuid;

fn registry() -> SubsystemRegistry<Uuid> {
    SubsystemRegistry::new(["ACS", "IDN"])
}

#[test]
fn test_join_then_ready() {
    let mut reg = registry();
    let conn = Uuid::new_v4();
    reg.welcome(conn);

    assert_eq!(reg.register("ACS", conn), Ok(PeerState::Joined));
    assert_eq!(reg.identity_of(&conn), Some("ACS"));
    assert!(reg.get("ACS").unwrap().required);

    assert_eq!(reg.advance("ACS", PeerEvent::Ready), Ok(PeerState::Ready));
    assert_eq!(reg.state_of("ACS"), PeerState::Ready);
}

#[test]
fn test_non_required_peer() {
    let mut reg = registry();
    let conn = Uuid::new_v4();
    reg.register("MEM", conn).unwrap();
    assert!(!reg.get("MEM").unwrap().required);
}

#[test]
fn test_ready_before_join_is_rejected() {
    let mut reg = registry();
    assert_eq!(
        reg.advance("ACS", PeerEvent::Ready),
        Err(LifecycleError::UnknownPeer("ACS".into()))
    );
}

#[test]
fn test_double_join_is_illegal() {
    let mut reg = registry();
    let conn = Uuid::new_v4();
    reg.register("ACS", conn).unwrap();
    let err = reg.register("ACS", conn).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::IllegalTransition { state: PeerState::Joined, event: PeerEvent::Join, .. }
    ));
}

#[test]
fn test_duplicate_identity_on_other_connection() {
    let mut reg = registry();
    reg.register("ACS", Uuid::new_v4()).unwrap();
    assert_eq!(
        reg.register("ACS", Uuid::new_v4()),
        Err(LifecycleError::DuplicateIdentity("ACS".into()))
    );
}

#[test]
fn test_ready_twice_is_illegal() {
    let mut reg = registry();
    reg.register("ACS", Uuid::new_v4()).unwrap();
    reg.advance("ACS", PeerEvent::Ready).unwrap();
    assert!(reg.advance("ACS", PeerEvent::Ready).is_err());
    assert_eq!(reg.state_of("ACS"), PeerState::Ready);
}

#[test]
fn test_shutdown_sequence() {
    let mut reg = registry();
    reg.register("ACS", Uuid::new_v4()).unwrap();
    reg.advance("ACS", PeerEvent::Ready).unwrap();

    assert_eq!(reg.advance("ACS", PeerEvent::Die), Ok(PeerState::Dying));
    assert_eq!(reg.advance("ACS", PeerEvent::Dying), Ok(PeerState::Dying));
    assert_eq!(reg.advance("ACS", PeerEvent::Dead), Ok(PeerState::Disconnected));
    assert!(reg.get("ACS").is_none());
    assert!(reg.is_empty());
}

#[test]
fn test_remove_evicts_from_barrier() {
    let mut reg = registry();
    let mut barrier = CycleBarrier::new(["ACS", "IDN"]);
    reg.register("ACS", Uuid::new_v4()).unwrap();
    reg.register("IDN", Uuid::new_v4()).unwrap();
    barrier.arm(0);
    barrier.satisfy("ACS");

    let removed = reg.remove("IDN", &mut barrier).unwrap();
    assert_eq!(removed.identity.as_deref(), Some("IDN"));
    assert!(barrier.is_released());
    assert_eq!(reg.state_of("IDN"), PeerState::Disconnected);
}

#[test]
fn test_remove_unjoined_handle() {
    let mut reg = registry();
    let mut barrier = CycleBarrier::new(["ACS"]);
    let conn = Uuid::new_v4();
    reg.welcome(conn);
    let removed = reg.remove_handle(&conn, &mut barrier).unwrap();
    assert!(removed.identity.is_none());
    assert!(reg.is_empty());
}

#[test]
fn test_identity_reusable_after_disconnect() {
    let mut reg = registry();
    let mut barrier = CycleBarrier::new(["ACS"]);
    let first = Uuid::new_v4();
    reg.register("ACS", first).unwrap();
    reg.remove_handle(&first, &mut barrier);

    let second = Uuid::new_v4();
    assert_eq!(reg.register("ACS", second), Ok(PeerState::Joined));
    assert_eq!(reg.handle_of("ACS"), Some(&second));
}

#[test]
fn test_all_required_ready() {
    let mut reg = registry();
    reg.register("ACS", Uuid::new_v4()).unwrap();
    reg.register("IDN", Uuid::new_v4()).unwrap();
    reg.advance("ACS", PeerEvent::Ready).unwrap();
    assert!(!reg.all_required_ready());
    assert_eq!(reg.ready_required(), vec!["ACS".to_string()]);

    reg.advance("IDN", PeerEvent::Ready).unwrap();
    assert!(reg.all_required_ready());
}
