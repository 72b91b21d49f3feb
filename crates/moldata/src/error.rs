/// Errors raised while configuring or reading molecule datasets.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// No property name was supplied to a labeled dataset.
    #[error(
        "Please pass the desired property to train on via \"dataset_arg\". \
         Available properties are {available}."
    )]
    MissingProperty { available: String },

    /// The property name matches neither a canonical name nor an alias.
    #[error("Unknown property \"{name}\". Available properties are {available}.")]
    UnknownProperty { name: String, available: String },

    /// No molecule name was supplied to MD17.
    #[error(
        "Please pass the desired molecule via \"dataset_arg\". \
         Available molecules are {available}."
    )]
    MissingMolecule { available: String },

    /// The molecule name is not part of MD17.
    #[error("Unknown molecule \"{name}\". Available molecules are {available}.")]
    UnknownMolecule { name: String, available: String },

    /// A record of a labeled set cannot supply the selected label.
    #[error("Record {index}: {source}")]
    Label {
        index: usize,
        #[source]
        source: Box<DatasetError>,
    },

    /// A target row is too narrow for the selected column.
    #[error("Target row has {width} columns, cannot select column {column}")]
    TargetWidth { width: usize, column: usize },

    /// A labeled dataset yielded a record without a target row.
    #[error("Record has no target row to select a label from")]
    MissingTarget,

    /// The dataset kind is not one of the known adapters.
    #[error("Unknown dataset \"{0}\" (expected one of: qm9, qm9sp, md17, ani1, custom)")]
    UnknownKind(String),

    /// Split sizes are inconsistent with the dataset length.
    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    /// A stored record failed validation.
    #[error("Malformed record {index}: {reason}")]
    Malformed { index: usize, reason: String },
}
