//! Structural validation of configurations.
//!
//! [`validate`] is a pure function: it never fails and never stops early. Every check
//! runs to completion and all defects are returned together, so an operator fixing a
//! configuration sees the whole list at once.
//!
//! Checks, in order:
//!
//! 1. Every slot number lies within `[1, platform.slots]`.
//! 2. Every occupied slot hosts a known instrument kind.
//! 3. Every routing endpoint resolves: sources to a physical input or an output port of
//!    an occupied slot, destinations to a physical output or an input port of an
//!    occupied slot. Which slot ports exist comes from the platform's suffix lists,
//!    narrowed by the instrument kind.
//! 4. No destination is driven twice.
//! 5. For deployment only: CloudCompile slots reference a bitstream, and at least one
//!    slot is occupied.
//!
//! An empty result means well-formed. It does not mean deployable: whether bitstream
//! files exist on disk is checked by the loader.

use std::collections::HashMap;

use crate::error::{EndpointRole, ValidationError};
use crate::model::{ConfigurationView, InstrumentKind, PortId};

/// Why a configuration is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPurpose {
    /// Looking at a configuration without deploying it
    Inspect,
    /// About to hand the configuration to the executor
    Deploy,
}

/// Validate `config`, returning every defect found.
pub fn validate<C: ConfigurationView + ?Sized>(
    config: &C,
    purpose: ValidationPurpose,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let platform = config.platform();

    for (&slot, slot_config) in config.slots() {
        if !platform.has_slot(slot) {
            errors.push(ValidationError::SlotOutOfRange {
                slot: i64::from(slot),
                slot_count: platform.slots,
            });
        }
        if let InstrumentKind::Unknown(name) = &slot_config.instrument {
            errors.push(ValidationError::UnknownInstrument {
                slot,
                name: name.clone(),
            });
        }
    }

    for &slot in config.unaddressable_slots() {
        errors.push(ValidationError::SlotOutOfRange {
            slot,
            slot_count: platform.slots,
        });
    }

    let mut driven: HashMap<&PortId, usize> = HashMap::new();
    for (index, connection) in config.routing().iter().enumerate() {
        if !resolves(config, &connection.source, EndpointRole::Source) {
            errors.push(ValidationError::UnknownEndpoint {
                index,
                role: EndpointRole::Source,
                endpoint: connection.source.clone(),
            });
        }
        if !resolves(config, &connection.destination, EndpointRole::Destination) {
            errors.push(ValidationError::UnknownEndpoint {
                index,
                role: EndpointRole::Destination,
                endpoint: connection.destination.clone(),
            });
        }
        if let Some(&first_index) = driven.get(&connection.destination) {
            errors.push(ValidationError::DuplicateDestination {
                index,
                first_index,
                destination: connection.destination.clone(),
            });
        } else {
            driven.insert(&connection.destination, index);
        }
    }

    if purpose == ValidationPurpose::Deploy {
        for (&slot, slot_config) in config.slots() {
            if slot_config.instrument.spec().requires_bitstream && !slot_config.has_bitstream() {
                errors.push(ValidationError::MissingBitstream { slot });
            }
        }
        if config.slots().is_empty() {
            errors.push(ValidationError::NoSlots);
        }
    }

    errors
}

fn resolves<C: ConfigurationView + ?Sized>(config: &C, port: &PortId, role: EndpointRole) -> bool {
    let platform = config.platform();
    let physical = match role {
        EndpointRole::Source => platform.is_physical_source(port.as_str()),
        EndpointRole::Destination => platform.is_physical_destination(port.as_str()),
    };
    if physical {
        return true;
    }

    let Some((slot, suffix)) = port.slot_port() else {
        return false;
    };
    if !platform.has_slot(slot) {
        return false;
    }
    match config.slots().get(&slot) {
        Some(slot_config) => match role {
            EndpointRole::Source => slot_config.instrument.exposes_output(platform, suffix),
            EndpointRole::Destination => slot_config.instrument.exposes_input(platform, suffix),
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Configuration, MokuConnection, SlotConfig};
    use crate::platform::PlatformPreset;

    fn go_config() -> Configuration {
        Configuration::new(PlatformPreset::MokuGo.platform())
    }

    #[test]
    fn test_valid_configuration() {
        let config = go_config()
            .with_slot(1, SlotConfig::cloud_compile("probe.tar"))
            .with_slot(2, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_connection(MokuConnection::new("Input1", "Slot1InA"))
            .with_connection(MokuConnection::new("Slot1OutA", "Output1"))
            .with_connection(MokuConnection::new("Slot1OutA", "Slot2InA"));

        assert!(validate(&config, ValidationPurpose::Deploy).is_empty());
    }

    #[test]
    fn test_slot_out_of_range() {
        let config = go_config()
            .with_slot(3, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_slot(0, SlotConfig::new(InstrumentKind::Oscilloscope));

        let errors = validate(&config, ValidationPurpose::Inspect);
        assert_eq!(
            errors,
            vec![
                ValidationError::SlotOutOfRange { slot: 0, slot_count: 2 },
                ValidationError::SlotOutOfRange { slot: 3, slot_count: 2 },
            ]
        );
    }

    #[test]
    fn test_endpoint_on_unoccupied_slot() {
        let config = go_config()
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_connection(MokuConnection::new("Slot2OutA", "Output1"));

        let errors = validate(&config, ValidationPurpose::Inspect);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownEndpoint {
                index: 0,
                role: EndpointRole::Source,
                endpoint: PortId::new("Slot2OutA"),
            }]
        );
    }

    #[test]
    fn test_direction_is_enforced() {
        let config = go_config()
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_connection(MokuConnection::new("Output1", "Slot1OutA"));

        let errors = validate(&config, ValidationPurpose::Inspect);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_suffix_not_exposed_by_kind() {
        let config = Configuration::new(PlatformPreset::MokuPro.platform())
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_slot(2, SlotConfig::cloud_compile("x.tar"))
            .with_connection(MokuConnection::new("Slot1OutC", "Output1"))
            .with_connection(MokuConnection::new("Slot2OutC", "Output2"));

        let errors = validate(&config, ValidationPurpose::Deploy);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownEndpoint {
                index: 0,
                role: EndpointRole::Source,
                endpoint: PortId::new("Slot1OutC"),
            }]
        );
    }

    #[test]
    fn test_duplicate_destination_reported_among_other_errors() {
        let config = go_config()
            .with_slot(5, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_slot(1, SlotConfig::new(InstrumentKind::CloudCompile))
            .with_connection(MokuConnection::new("Nowhere", "Output1"))
            .with_connection(MokuConnection::new("Input1", "Output1"))
            .with_connection(MokuConnection::new("Input2", "Output1"));

        let errors = validate(&config, ValidationPurpose::Deploy);
        let duplicates: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::DuplicateDestination { .. }))
            .collect();
        assert_eq!(duplicates.len(), 2);
        assert!(errors.contains(&ValidationError::DuplicateDestination {
            index: 2,
            first_index: 0,
            destination: PortId::new("Output1"),
        }));
        assert!(errors.contains(&ValidationError::MissingBitstream { slot: 1 }));
        assert!(errors.contains(&ValidationError::SlotOutOfRange { slot: 5, slot_count: 2 }));
    }

    #[test]
    fn test_fan_out_is_allowed() {
        let config = go_config()
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_connection(MokuConnection::new("Input1", "Slot1InA"))
            .with_connection(MokuConnection::new("Input1", "Slot1InB"))
            .with_connection(MokuConnection::new("Input1", "Output1"));

        assert!(validate(&config, ValidationPurpose::Deploy).is_empty());
    }

    #[test]
    fn test_bitstream_only_required_for_deploy() {
        let config = go_config().with_slot(1, SlotConfig::new(InstrumentKind::CloudCompile));

        assert!(validate(&config, ValidationPurpose::Inspect).is_empty());
        assert_eq!(
            validate(&config, ValidationPurpose::Deploy),
            vec![ValidationError::MissingBitstream { slot: 1 }]
        );
    }

    #[test]
    fn test_empty_bitstream_path_counts_as_missing() {
        let config = go_config().with_slot(1, SlotConfig::cloud_compile(""));
        assert_eq!(
            validate(&config, ValidationPurpose::Deploy),
            vec![ValidationError::MissingBitstream { slot: 1 }]
        );
    }

    #[test]
    fn test_empty_configuration() {
        let config = go_config();
        assert!(validate(&config, ValidationPurpose::Inspect).is_empty());
        assert_eq!(
            validate(&config, ValidationPurpose::Deploy),
            vec![ValidationError::NoSlots]
        );
    }

    #[test]
    fn test_unknown_instrument() {
        let config = go_config().with_slot(1, SlotConfig::new(InstrumentKind::parse("Theremin")));
        assert_eq!(
            validate(&config, ValidationPurpose::Inspect),
            vec![ValidationError::UnknownInstrument {
                slot: 1,
                name: "Theremin".into()
            }]
        );
    }
}
