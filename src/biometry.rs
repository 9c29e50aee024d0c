//! Measurement records produced by the extraction pipeline.
//!
//! Every field is either a parsed value or `None`. A zero is a real reading,
//! never a stand-in for "not found".

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Which eye a measurement belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    /// Right eye
    Od,
    /// Left eye
    Os,
}

impl Eye {
    pub fn label(self) -> &'static str {
        match self {
            Eye::Od => "OD",
            Eye::Os => "OS",
        }
    }
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Keratometry pair. Reports always print K1 and K2 together, so they are
/// stored and merged as one value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keratometry {
    pub k1: f64,
    pub k2: f64,
}

/// One eye's measurement set.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EyeMeasurement {
    /// Axial length (mm)
    pub al: Option<f64>,
    /// K1/K2 (diopters)
    pub keratometry: Option<Keratometry>,
    /// Anterior chamber depth (mm)
    pub acd: Option<f64>,
}

impl EyeMeasurement {
    pub fn k1(&self) -> Option<f64> {
        self.keratometry.map(|k| k.k1)
    }

    pub fn k2(&self) -> Option<f64> {
        self.keratometry.map(|k| k.k2)
    }

    /// True when AL, K1, K2 and ACD are all present.
    pub fn is_complete(&self) -> bool {
        self.al.is_some() && self.keratometry.is_some() && self.acd.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.al.is_none() && self.keratometry.is_none() && self.acd.is_none()
    }

    /// Copies every field of `other` that is absent here. Present fields are
    /// never overwritten.
    pub fn fill_missing_from(&mut self, other: &EyeMeasurement) {
        if self.al.is_none() {
            self.al = other.al;
        }
        if self.keratometry.is_none() {
            self.keratometry = other.keratometry;
        }
        if self.acd.is_none() {
            self.acd = other.acd;
        }
    }

    /// Names of the absent fields, in report order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.al.is_none() {
            missing.push("AL");
        }
        if self.keratometry.is_none() {
            missing.push("K1");
            missing.push("K2");
        }
        if self.acd.is_none() {
            missing.push("ACD");
        }
        missing
    }
}

/// Both eyes of one exam.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BiometryRecord {
    pub od: EyeMeasurement,
    pub os: EyeMeasurement,
}

impl BiometryRecord {
    pub fn eye(&self, eye: Eye) -> &EyeMeasurement {
        match eye {
            Eye::Od => &self.od,
            Eye::Os => &self.os,
        }
    }

    pub fn eye_mut(&mut self, eye: Eye) -> &mut EyeMeasurement {
        match eye {
            Eye::Od => &mut self.od,
            Eye::Os => &mut self.os,
        }
    }

    /// True iff all 8 scalar fields across both eyes are present.
    pub fn is_complete(&self) -> bool {
        self.od.is_complete() && self.os.is_complete()
    }

    /// Eyes that still have at least one absent field.
    pub fn incomplete_eyes(&self) -> Vec<Eye> {
        [Eye::Od, Eye::Os]
            .into_iter()
            .filter(|&eye| !self.eye(eye).is_complete())
            .collect()
    }

    pub fn fill_missing_from(&mut self, other: &BiometryRecord) {
        self.od.fill_missing_from(&other.od);
        self.os.fill_missing_from(&other.os);
    }
}

impl Serialize for EyeMeasurement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EyeMeasurement", 4)?;
        state.serialize_field("AL", &self.al)?;
        state.serialize_field("K1", &self.k1())?;
        state.serialize_field("K2", &self.k2())?;
        state.serialize_field("ACD", &self.acd)?;
        state.end()
    }
}

impl Serialize for BiometryRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("BiometryRecord", 2)?;
        state.serialize_field("OD", &self.od)?;
        state.serialize_field("OS", &self.os)?;
        state.end()
    }
}
