use printlink_core::{Error, LinkState, Notification, NotificationDispatcher, PrintTask};

#[test]
fn test_print_lifecycle_transitions() {
    let path = [
        LinkState::Disconnected,
        LinkState::Connecting,
        LinkState::Connected,
        LinkState::PreparingToPrint,
        LinkState::Printing,
        LinkState::Paused,
        LinkState::Printing,
        LinkState::FinishedPrint,
        LinkState::Connected,
        LinkState::Disconnecting,
        LinkState::Disconnected,
    ];
    for pair in path.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "{} -> {} should be legal",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_illegal_transitions() {
    assert!(!LinkState::Disconnected.can_transition_to(LinkState::Printing));
    assert!(!LinkState::Connecting.can_transition_to(LinkState::Printing));
    assert!(!LinkState::ConnectionLost.can_transition_to(LinkState::Connected));
    assert!(!LinkState::Disconnecting.can_transition_to(LinkState::Connected));
}

#[test]
fn test_every_state_can_disconnect() {
    let all = [
        LinkState::Disconnected,
        LinkState::Connecting,
        LinkState::FailedToConnect,
        LinkState::Connected,
        LinkState::PreparingToPrint,
        LinkState::Printing,
        LinkState::PrintingFromRemovableMedia,
        LinkState::Paused,
        LinkState::FinishedPrint,
        LinkState::Disconnecting,
        LinkState::ConnectionLost,
    ];
    for state in all {
        assert!(state.can_transition_to(LinkState::Disconnected));
    }
}

#[test]
fn test_print_task_finalizes_once() {
    let mut task = PrintTask::new("cube.gcode");
    task.set_progress(42.0);
    assert!(task.is_recoverable());
    assert!(task.finalize());
    assert!(!task.finalize());
    assert!(!task.is_recoverable());
}

#[test]
fn test_illegal_in_state_error() {
    let err = Error::illegal_in_state("start a print", LinkState::Disconnected);
    assert!(err.is_state_error());
    assert_eq!(err.to_string(), "Cannot start a print while Disconnected");
}

#[tokio::test]
async fn test_late_subscriber_sees_later_notifications() {
    let dispatcher = NotificationDispatcher::default();
    dispatcher.publish(Notification::ConnectionSucceeded);

    let mut rx = dispatcher.subscribe();
    dispatcher.publish(Notification::StateChanged {
        from: LinkState::Connecting,
        to: LinkState::Connected,
    });
    assert_eq!(
        rx.recv().await.unwrap(),
        Notification::StateChanged {
            from: LinkState::Connecting,
            to: LinkState::Connected,
        }
    );
}
