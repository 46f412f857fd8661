//! Algebraic properties of the differ, checked over a small corpus of configurations.

use moku_conf::diff::diff;
use moku_conf::error::ValidationError;
use moku_conf::model::{Configuration, InstrumentKind, MokuConnection, SlotConfig};
use moku_conf::platform::PlatformPreset;
use moku_conf::validate::{validate, ValidationPurpose};

fn pro() -> Configuration {
    Configuration::new(PlatformPreset::MokuPro.platform())
}

fn corpus() -> Vec<Configuration> {
    vec![
        pro(),
        pro()
            .with_slot(1, SlotConfig::cloud_compile("a.tar"))
            .with_connection(MokuConnection::new("Input1", "Slot1InA"))
            .with_connection(MokuConnection::new("Slot1OutA", "Output1")),
        pro()
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_slot(3, SlotConfig::new(InstrumentKind::PidController))
            .with_connection(MokuConnection::new("Input2", "Slot3InA"))
            .with_connection(MokuConnection::new("Slot3OutA", "Slot1InA"))
            .with_connection(MokuConnection::new("Slot3OutA", "Output4")),
        pro()
            .with_slot(2, SlotConfig::new(InstrumentKind::WaveformGenerator))
            .with_slot(3, SlotConfig::new(InstrumentKind::LockInAmp))
            .with_slot(4, SlotConfig::cloud_compile("b.tar").with_register(1, 42))
            .with_connection(MokuConnection::new("Slot2OutA", "Output1"))
            .with_connection(MokuConnection::new("Slot2OutB", "Slot4InA"))
            .with_connection(MokuConnection::new("Slot1OutA", "Output1")),
    ]
}

#[test]
fn diff_is_reflexive() {
    for config in corpus() {
        let d = diff(&config, &config);
        assert!(d.identical);
        assert!(d.slots_added.is_empty());
        assert!(d.slots_removed.is_empty());
        assert!(d.slots_changed.is_empty());
        assert!(d.routing_added.is_empty());
        assert!(d.routing_removed.is_empty());
    }
}

#[test]
fn diff_is_anti_symmetric() {
    let corpus = corpus();
    for a in &corpus {
        for b in &corpus {
            let ab = diff(a, b);
            let ba = diff(b, a);
            assert_eq!(ab.slots_added, ba.slots_removed);
            assert_eq!(ab.slots_removed, ba.slots_added);
            assert_eq!(ab.routing_added, ba.routing_removed);
            assert_eq!(ab.routing_removed, ba.routing_added);
            assert_eq!(ab.identical, ba.identical);
        }
    }
}

#[test]
fn diff_ignores_routing_and_slot_order() {
    let corpus = corpus();
    for a in &corpus {
        for b in &corpus {
            let expected = diff(a, b);

            let mut reversed = b.clone();
            reversed.routing.reverse();
            assert_eq!(diff(a, &reversed), expected);

            let mut rotated = a.clone();
            if !rotated.routing.is_empty() {
                rotated.routing.rotate_left(1);
            }
            assert_eq!(diff(&rotated, b), expected);

            // rebuild with slots inserted in reverse order
            let mut reinserted = Configuration::new(b.platform.clone());
            for (slot, config) in b.slots.iter().rev() {
                reinserted = reinserted.with_slot(*slot, config.clone());
            }
            reinserted.routing = b.routing.clone();
            assert_eq!(diff(a, &reinserted), expected);
        }
    }
}

#[test]
fn settings_only_change_is_not_a_slot_change() {
    let current = pro().with_slot(
        2,
        SlotConfig::new(InstrumentKind::Oscilloscope)
            .with_setting("frontend", serde_json::json!({"impedance": "1MOhm"})),
    );
    let desired = pro().with_slot(
        2,
        SlotConfig::new(InstrumentKind::Oscilloscope)
            .with_setting("frontend", serde_json::json!({"impedance": "50Ohm"}))
            .with_register(0, 1),
    );

    let d = diff(&current, &desired);
    assert!(d.slots_changed.is_empty());
    assert!(d.identical);
}

#[test]
fn duplicate_destination_always_reported() {
    // Each variant stacks more unrelated defects on top of the duplicate.
    let base = pro()
        .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
        .with_connection(MokuConnection::new("Input1", "Output1"))
        .with_connection(MokuConnection::new("Input2", "Output1"));
    let variants = vec![
        base.clone(),
        base.clone().with_slot(9, SlotConfig::new(InstrumentKind::Oscilloscope)),
        base.clone()
            .with_slot(2, SlotConfig::new(InstrumentKind::CloudCompile))
            .with_slot(3, SlotConfig::new(InstrumentKind::parse("Mystery")))
            .with_connection(MokuConnection::new("Nowhere", "Elsewhere")),
    ];

    for config in variants {
        for purpose in [ValidationPurpose::Inspect, ValidationPurpose::Deploy] {
            let errors = validate(&config, purpose);
            assert!(
                errors.iter().any(|e| matches!(
                    e,
                    ValidationError::DuplicateDestination { index: 1, first_index: 0, .. }
                )),
                "duplicate missing from {errors:?}"
            );
        }
    }
}
