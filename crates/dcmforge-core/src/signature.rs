//! Stack signature computation (§4.2): the tuple of rounded, stack-defining
//! parameters that decides stack membership, plus orientation categorization
//! and `stack_key` derivation.

use crate::entities::StackOrientation;
use serde::{Deserialize, Serialize};

/// Raw, unrounded per-instance fields the signature is computed from. One of
/// these is built per instance during extraction; which fields matter
/// depends on modality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStackFields {
    pub echo_time: Option<f64>,
    pub inversion_time: Option<f64>,
    pub echo_numbers: Option<i32>,
    pub echo_train_length: Option<i32>,
    pub repetition_time: Option<f64>,
    pub flip_angle: Option<f64>,
    pub receive_coil_name: Option<String>,
    pub image_type: Vec<String>,
    pub image_orientation_patient: Option<[f64; 6]>,

    pub kvp: Option<f64>,
    pub exposure: Option<f64>,
    pub tube_current: Option<f64>,

    pub bed_index: Option<i32>,
    pub frame_type: Option<String>,
}

fn round_to(value: f64, decimals: i32) -> i64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() as i64
}

/// Categorize ImageOrientationPatient direction cosines (§4.2, §8.11).
///
/// The orientation is the axis of the normal vector (row × column) with
/// maximum absolute magnitude; confidence is that magnitude divided by the
/// vector's norm. Ties, and unparseable input, resolve to `(Axial, 0.5)`.
pub fn orientation_from_cosines(iop: Option<[f64; 6]>) -> (StackOrientation, f64) {
    let Some(iop) = iop else {
        return (StackOrientation::Axial, 0.5);
    };
    let row = [iop[0], iop[1], iop[2]];
    let col = [iop[3], iop[4], iop[5]];
    let normal = [
        row[1] * col[2] - row[2] * col[1],
        row[2] * col[0] - row[0] * col[2],
        row[0] * col[1] - row[1] * col[0],
    ];
    let norm = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    if norm < f64::EPSILON {
        return (StackOrientation::Axial, 0.5);
    }
    let abs = [normal[0].abs(), normal[1].abs(), normal[2].abs()];
    let max = abs[0].max(abs[1]).max(abs[2]);

    // Tie (more than one axis at the maximum magnitude) → Axial, 0.5, per
    // spec. A tie can only happen from direct floating equality here since
    // `max` was derived from `abs` itself.
    let tied = abs.iter().filter(|a| (**a - max).abs() < 1e-12).count() > 1;
    if tied {
        return (StackOrientation::Axial, 0.5);
    }

    let confidence = max / norm;
    let orientation = if abs[0] == max {
        StackOrientation::Sagittal
    } else if abs[1] == max {
        StackOrientation::Coronal
    } else {
        StackOrientation::Axial
    };
    (orientation, confidence)
}

/// The rounded, hashable signature that decides stack membership. Modality
/// determines which physics fields participate; orientation and image_type
/// always do (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackSignature {
    Mr {
        echo_time_centi: Option<i64>,
        inversion_time_deci: Option<i64>,
        echo_numbers: Option<i32>,
        echo_train_length: Option<i32>,
        repetition_time_deci: Option<i64>,
        flip_angle_deci: Option<i64>,
        receive_coil_name: Option<String>,
        orientation: StackOrientationKey,
        image_type: Vec<String>,
    },
    Ct {
        kvp_int: Option<i64>,
        exposure_int: Option<i64>,
        tube_current_int: Option<i64>,
        orientation: StackOrientationKey,
        image_type: Vec<String>,
    },
    Pet {
        bed_index: Option<i32>,
        frame_type: Option<String>,
        orientation: StackOrientationKey,
        image_type: Vec<String>,
    },
}

/// `StackOrientation` wrapper that buckets confidence out of the hash key:
/// two instances with the same categorical orientation belong to the same
/// stack regardless of small confidence differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackOrientationKey(pub StackOrientation);

pub fn compute_mr_signature(fields: &InstanceStackFields) -> StackSignature {
    let (orientation, _) = orientation_from_cosines(fields.image_orientation_patient);
    StackSignature::Mr {
        echo_time_centi: fields.echo_time.map(|v| round_to(v, 2)),
        inversion_time_deci: fields.inversion_time.map(|v| round_to(v, 1)),
        echo_numbers: fields.echo_numbers,
        echo_train_length: fields.echo_train_length,
        repetition_time_deci: fields.repetition_time.map(|v| round_to(v, 1)),
        flip_angle_deci: fields.flip_angle.map(|v| round_to(v, 1)),
        receive_coil_name: fields.receive_coil_name.clone(),
        orientation: StackOrientationKey(orientation),
        image_type: fields.image_type.clone(),
    }
}

pub fn compute_ct_signature(fields: &InstanceStackFields) -> StackSignature {
    let (orientation, _) = orientation_from_cosines(fields.image_orientation_patient);
    StackSignature::Ct {
        kvp_int: fields.kvp.map(|v| round_to(v, 0)),
        exposure_int: fields.exposure.map(|v| round_to(v, 0)),
        tube_current_int: fields.tube_current.map(|v| round_to(v, 0)),
        orientation: StackOrientationKey(orientation),
        image_type: fields.image_type.clone(),
    }
}

pub fn compute_pet_signature(fields: &InstanceStackFields) -> StackSignature {
    let (orientation, _) = orientation_from_cosines(fields.image_orientation_patient);
    StackSignature::Pet {
        bed_index: fields.bed_index,
        frame_type: fields.frame_type.clone(),
        orientation: StackOrientationKey(orientation),
        image_type: fields.image_type.clone(),
    }
}

/// A variance axis that can differ between sibling stacks of one series,
/// used to derive `stack_key` (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarianceAxis {
    Echo,
    Ti,
    FlipAngle,
    Coil,
    Orientation,
    Bed,
    ImageType,
}

impl VarianceAxis {
    fn label(&self) -> &'static str {
        match self {
            VarianceAxis::Echo => "multi_echo",
            VarianceAxis::Ti => "multi_ti",
            VarianceAxis::FlipAngle => "multi_flip_angle",
            VarianceAxis::Coil => "multi_coil",
            VarianceAxis::Orientation => "multi_orientation",
            VarianceAxis::Bed => "multi_bed",
            VarianceAxis::ImageType => "image_type_variation",
        }
    }
}

fn varies<T: PartialEq>(values: &[T]) -> bool {
    values.windows(2).any(|w| w[0] != w[1])
}

/// Determine why a series split into multiple stacks. `None` for
/// single-stack series; `"multi_parameter"` when more than one axis varies;
/// `"multi_stack"` when stacks differ but none of the named axes vary.
pub fn derive_stack_key(signatures: &[StackSignature]) -> Option<String> {
    if signatures.len() <= 1 {
        return None;
    }

    let mut varying = Vec::new();

    match signatures.first() {
        Some(StackSignature::Mr { .. }) => {
            let echo: Vec<_> = signatures.iter().map(|s| mr_field(s, MrField::Echo)).collect();
            let ti: Vec<_> = signatures.iter().map(|s| mr_field(s, MrField::Ti)).collect();
            let flip: Vec<_> = signatures.iter().map(|s| mr_field(s, MrField::Flip)).collect();
            let coil: Vec<_> = signatures.iter().map(|s| mr_field(s, MrField::Coil)).collect();
            let orientation: Vec<_> = signatures.iter().map(orientation_of).collect();
            let image_type: Vec<_> = signatures.iter().map(image_type_of).collect();

            if varies(&echo) {
                varying.push(VarianceAxis::Echo);
            }
            if varies(&ti) {
                varying.push(VarianceAxis::Ti);
            }
            if varies(&flip) {
                varying.push(VarianceAxis::FlipAngle);
            }
            if varies(&coil) {
                varying.push(VarianceAxis::Coil);
            }
            if varies(&orientation) {
                varying.push(VarianceAxis::Orientation);
            }
            if varies(&image_type) {
                varying.push(VarianceAxis::ImageType);
            }
        }
        Some(StackSignature::Pet { .. }) => {
            let bed: Vec<_> = signatures
                .iter()
                .map(|s| match s {
                    StackSignature::Pet { bed_index, .. } => *bed_index,
                    _ => None,
                })
                .collect();
            let orientation: Vec<_> = signatures.iter().map(orientation_of).collect();
            let image_type: Vec<_> = signatures.iter().map(image_type_of).collect();
            if varies(&bed) {
                varying.push(VarianceAxis::Bed);
            }
            if varies(&orientation) {
                varying.push(VarianceAxis::Orientation);
            }
            if varies(&image_type) {
                varying.push(VarianceAxis::ImageType);
            }
        }
        Some(StackSignature::Ct { .. }) | None => {
            let orientation: Vec<_> = signatures.iter().map(orientation_of).collect();
            let image_type: Vec<_> = signatures.iter().map(image_type_of).collect();
            if varies(&orientation) {
                varying.push(VarianceAxis::Orientation);
            }
            if varies(&image_type) {
                varying.push(VarianceAxis::ImageType);
            }
        }
    }

    match varying.len() {
        0 => Some("multi_stack".to_string()),
        1 => Some(varying[0].label().to_string()),
        _ => Some("multi_parameter".to_string()),
    }
}

enum MrField {
    Echo,
    Ti,
    Flip,
    Coil,
}

fn mr_field(sig: &StackSignature, field: MrField) -> Option<String> {
    match sig {
        StackSignature::Mr {
            echo_time_centi,
            inversion_time_deci,
            flip_angle_deci,
            receive_coil_name,
            ..
        } => match field {
            MrField::Echo => echo_time_centi.map(|v| v.to_string()),
            MrField::Ti => inversion_time_deci.map(|v| v.to_string()),
            MrField::Flip => flip_angle_deci.map(|v| v.to_string()),
            MrField::Coil => receive_coil_name.clone(),
        },
        _ => None,
    }
}

fn orientation_of(sig: &StackSignature) -> StackOrientationKey {
    match sig {
        StackSignature::Mr { orientation, .. } => *orientation,
        StackSignature::Ct { orientation, .. } => *orientation,
        StackSignature::Pet { orientation, .. } => *orientation,
    }
}

fn image_type_of(sig: &StackSignature) -> Vec<String> {
    match sig {
        StackSignature::Mr { image_type, .. } => image_type.clone(),
        StackSignature::Ct { image_type, .. } => image_type.clone(),
        StackSignature::Pet { image_type, .. } => image_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_axial_from_identity() {
        let iop = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(orientation_from_cosines(Some(iop)), (StackOrientation::Axial, 1.0));
    }

    #[test]
    fn orientation_sagittal() {
        let iop = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        assert_eq!(orientation_from_cosines(Some(iop)), (StackOrientation::Sagittal, 1.0));
    }

    #[test]
    fn orientation_null_input() {
        assert_eq!(orientation_from_cosines(None), (StackOrientation::Axial, 0.5));
    }

    #[test]
    fn echo_time_rounding_groups_within_tolerance() {
        let mut a = InstanceStackFields::default();
        a.echo_time = Some(2.9);
        let mut b = InstanceStackFields::default();
        b.echo_time = Some(2.904);
        let mut c = InstanceStackFields::default();
        c.echo_time = Some(2.92);

        assert_eq!(compute_mr_signature(&a), compute_mr_signature(&b));
        assert_ne!(compute_mr_signature(&a), compute_mr_signature(&c));
    }

    #[test]
    fn stack_key_single_stack_is_none() {
        let a = compute_mr_signature(&InstanceStackFields::default());
        assert_eq!(derive_stack_key(&[a]), None);
    }

    #[test]
    fn stack_key_multi_echo() {
        let mut a = InstanceStackFields::default();
        a.echo_time = Some(2.9);
        let mut b = InstanceStackFields::default();
        b.echo_time = Some(80.0);
        let sigs = vec![compute_mr_signature(&a), compute_mr_signature(&b)];
        assert_eq!(derive_stack_key(&sigs), Some("multi_echo".to_string()));
    }

    #[test]
    fn stack_key_multi_parameter_when_two_axes_vary() {
        let mut a = InstanceStackFields::default();
        a.echo_time = Some(2.9);
        a.flip_angle = Some(9.0);
        let mut b = InstanceStackFields::default();
        b.echo_time = Some(80.0);
        b.flip_angle = Some(30.0);
        let sigs = vec![compute_mr_signature(&a), compute_mr_signature(&b)];
        assert_eq!(derive_stack_key(&sigs), Some("multi_parameter".to_string()));
    }
}
