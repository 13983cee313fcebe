//! ---
//! rcs_section: "02-state-machines"
//! rcs_subsection: "tests"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Behavioral tests for the state-machine engine."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use r_rcs_fsm::{
    default_fsm_config, Command, Fsm, FsmConfig, FsmDefinition, FsmError, Trigger, ERROR_STATE,
    INITIAL_STATE,
};

fn standard_fsm() -> Fsm {
    Fsm::new(FsmDefinition::standard())
}

#[test]
fn full_lifecycle_walk() {
    let mut fsm = standard_fsm();
    assert_eq!(fsm.state(), INITIAL_STATE);

    let steps = [
        (Trigger::Command(Command::Boot), "booting"),
        (Trigger::EndCommand(Command::Boot), "booted"),
        (Trigger::Command(Command::Configure), "configuring"),
        (Trigger::EndCommand(Command::Configure), "configured"),
        (Trigger::Command(Command::Start), "starting"),
        (Trigger::EndCommand(Command::Start), "running"),
        (Trigger::Command(Command::Stop), "stopping"),
        (Trigger::EndCommand(Command::Stop), "configured"),
        (Trigger::Command(Command::Scrap), "scrapping"),
        (Trigger::EndCommand(Command::Scrap), "booted"),
        (Trigger::Command(Command::Terminate), "terminating"),
        (Trigger::EndCommand(Command::Terminate), "none"),
    ];
    for (trigger, expected) in steps {
        assert_eq!(fsm.fire(&trigger).unwrap(), expected);
    }
}

#[test]
fn illegal_trigger_leaves_state_untouched() {
    let mut fsm = standard_fsm();
    let err = fsm.fire(&Trigger::Command(Command::Start)).unwrap_err();
    assert_eq!(
        err,
        FsmError::InvalidTransition {
            trigger: "start".to_owned(),
            state: INITIAL_STATE.to_owned(),
        }
    );
    assert_eq!(fsm.state(), INITIAL_STATE);

    fsm.fire(&Trigger::Command(Command::Boot)).unwrap();
    let err = fsm.fire(&Trigger::Command(Command::Configure)).unwrap_err();
    assert!(matches!(err, FsmError::InvalidTransition { .. }));
    assert_eq!(fsm.state(), "booting");
}

#[test]
fn to_error_is_legal_from_every_state() {
    for prefix_len in 0..4 {
        let mut fsm = standard_fsm();
        let walk = [
            Trigger::Command(Command::Boot),
            Trigger::EndCommand(Command::Boot),
            Trigger::Command(Command::Configure),
        ];
        for trigger in walk.iter().take(prefix_len) {
            fsm.fire(trigger).unwrap();
        }
        assert!(fsm.can_fire(&Trigger::ToError));
        assert_eq!(fsm.fire(&Trigger::ToError).unwrap(), ERROR_STATE);
    }
}

#[test]
fn recover_is_the_only_way_out_of_error() {
    let mut fsm = standard_fsm();
    fsm.fire(&Trigger::ToError).unwrap();
    for command in [Command::Boot, Command::Configure, Command::Start, Command::Stop] {
        assert!(!fsm.can_fire(&Trigger::Command(command)));
    }
    // terminate stays legal so an errored tree can still be torn down
    assert!(fsm.can_fire(&Trigger::Command(Command::Terminate)));
    assert_eq!(fsm.fire(&Trigger::Recover).unwrap(), INITIAL_STATE);
}

#[test]
fn trigger_names_round_trip_through_config() {
    let config: FsmConfig =
        serde_json::from_str(&serde_json::to_string(&default_fsm_config()).unwrap()).unwrap();
    assert_eq!(config, default_fsm_config());
    FsmDefinition::from_config(&config).unwrap();
}

#[test]
fn trigger_parse_rejects_garbage() {
    assert!(matches!(
        Trigger::parse("end_levitate"),
        Err(FsmError::UnknownTrigger(_))
    ));
    assert!(matches!(
        Trigger::parse("levitate"),
        Err(FsmError::UnknownTrigger(_))
    ));
    assert_eq!(Trigger::parse("end_stop").unwrap(), Trigger::EndCommand(Command::Stop));
    assert_eq!(Trigger::parse("to_error").unwrap(), Trigger::ToError);
    assert_eq!(Trigger::parse("recover").unwrap(), Trigger::Recover);
}
