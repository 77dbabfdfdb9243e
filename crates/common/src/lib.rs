// quad-common: shared wire-protocol types for the quad workspace

pub mod protocol;
