//! Remote MMAR descriptors and lookup.
//!
//! See <https://docs.nvidia.com/clara/clara-train-sdk/pt/mmar.html> for the
//! archive layout.

use crate::error::{Error, Result};
use crate::model::checksum::HashKind;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config_train.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Tar,
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,
}

impl ArchiveKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where and how to fetch one MMAR. `id` must be unique across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: Cow<'static, str>,
    pub name: Cow<'static, str>,
    pub url: Cow<'static, str>,
    pub doc: Cow<'static, str>,
    pub file_type: ArchiveKind,
    pub hash_type: HashKind,
    pub hash_val: Option<Cow<'static, str>>,
    /// Relative to the extracted archive, `/` separated.
    pub model_file: Cow<'static, str>,
    pub config_file: Option<Cow<'static, str>>,
}

impl ModelDescriptor {
    pub fn config_file(&self) -> &str {
        self.config_file.as_deref().unwrap_or(DEFAULT_CONFIG_FILE)
    }

    pub fn model_path(&self, model_dir: &Path) -> PathBuf {
        join_relative(model_dir, &self.model_file)
    }

    pub fn config_path(&self, model_dir: &Path) -> PathBuf {
        join_relative(model_dir, self.config_file())
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.{}", self.id, self.file_type.extension())
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |path, part| path.join(part))
}

const fn clara_pt(
    id: &'static str,
    name: &'static str,
    url: &'static str,
    doc: &'static str,
    model_file: &'static str,
    config_file: Option<&'static str>,
) -> ModelDescriptor {
    ModelDescriptor {
        id: Cow::Borrowed(id),
        name: Cow::Borrowed(name),
        url: Cow::Borrowed(url),
        doc: Cow::Borrowed(doc),
        file_type: ArchiveKind::Zip,
        hash_type: HashKind::Md5,
        hash_val: None,
        model_file: Cow::Borrowed(model_file),
        config_file: match config_file {
            Some(file) => Some(Cow::Borrowed(file)),
            None => None,
        },
    }
}

pub const MODEL_DESC: &[ModelDescriptor] = &[
    clara_pt(
        "clara_pt_prostate_mri_segmentation_1",
        "clara_pt_prostate_mri_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_prostate_mri_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_prostate_mri_segmentation",
        "models/model.pt",
        None,
    ),
    clara_pt(
        "clara_pt_covid19_ct_lesion_segmentation_1",
        "clara_pt_covid19_ct_lesion_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_covid19_ct_lesion_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_covid19_ct_lesion_segmentation",
        "models/model.pt",
        None,
    ),
    clara_pt(
        "clara_pt_fed_learning_brain_tumor_mri_segmentation_1",
        "clara_pt_fed_learning_brain_tumor_mri_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_fed_learning_brain_tumor_mri_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_fed_learning_brain_tumor_mri_segmentation",
        "models/server/best_FL_global_model.pt",
        None,
    ),
    clara_pt(
        "clara_pt_pathology_metastasis_detection_1",
        "clara_pt_pathology_metastasis_detection",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_pathology_metastasis_detection/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_pathology_metastasis_detection",
        "models/model.pt",
        Some("config/config_train.json"),
    ),
    clara_pt(
        "clara_pt_brain_mri_segmentation_1",
        "clara_pt_brain_mri_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_brain_mri_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_brain_mri_segmentation",
        "models/model.pt",
        None,
    ),
    clara_pt(
        "clara_pt_brain_mri_segmentation_t1c_1",
        "clara_pt_brain_mri_segmentation_t1c",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_brain_mri_segmentation_t1c/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_brain_mri_segmentation_t1c",
        "models/model.pt",
        None,
    ),
    clara_pt(
        "clara_pt_liver_and_tumor_ct_segmentation_1",
        "clara_pt_liver_and_tumor_ct_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_liver_and_tumor_ct_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_liver_and_tumor_ct_segmentation",
        "models/model.pt",
        Some("config/config_train.json"),
    ),
    clara_pt(
        "clara_pt_pancreas_and_tumor_ct_segmentation_1",
        "clara_pt_pancreas_and_tumor_ct_segmentation",
        "https://api.ngc.nvidia.com/v2/models/nvidia/med/clara_pt_pancreas_and_tumor_ct_segmentation/versions/1/zip",
        "https://ngc.nvidia.com/catalog/models/nvidia:med:clara_pt_pancreas_and_tumor_ct_segmentation",
        "models/model.pt",
        Some("config/config_train.json"),
    ),
];

/// A descriptor lookup: table position, id, or a descriptor already in hand.
#[derive(Debug, Clone, Copy)]
pub enum ModelRef<'a> {
    Index(usize),
    Id(&'a str),
    Descriptor(&'a ModelDescriptor),
}

impl<'a> ModelRef<'a> {
    /// Parses CLI input: anything that reads as an unsigned integer is an index.
    pub fn parse(input: &'a str) -> Self {
        match input.trim().parse::<usize>() {
            Ok(index) => ModelRef::Index(index),
            Err(_) => ModelRef::Id(input),
        }
    }

    pub fn resolve(self) -> Result<&'a ModelDescriptor> {
        resolve_in(MODEL_DESC, self)
    }
}

impl From<usize> for ModelRef<'_> {
    fn from(index: usize) -> Self {
        ModelRef::Index(index)
    }
}

impl<'a> From<&'a str> for ModelRef<'a> {
    fn from(id: &'a str) -> Self {
        ModelRef::Id(id)
    }
}

impl<'a> From<&'a String> for ModelRef<'a> {
    fn from(id: &'a String) -> Self {
        ModelRef::Id(id.as_str())
    }
}

impl<'a> From<&'a ModelDescriptor> for ModelRef<'a> {
    fn from(descriptor: &'a ModelDescriptor) -> Self {
        ModelRef::Descriptor(descriptor)
    }
}

pub(crate) fn resolve_in<'a>(
    table: &'a [ModelDescriptor],
    item: ModelRef<'a>,
) -> Result<&'a ModelDescriptor> {
    match item {
        ModelRef::Index(index) => table.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: table.len(),
        }),
        ModelRef::Id(id) => {
            let key = id.trim().to_lowercase();
            table
                .iter()
                .find(|candidate| candidate.id.trim().to_lowercase() == key)
                .ok_or_else(|| {
                    let known: Vec<&str> = table.iter().map(|d| d.id.as_ref()).collect();
                    Error::DescriptorNotFound(format!(
                        "'{}' (available: {})",
                        id,
                        known.join(", ")
                    ))
                })
        }
        ModelRef::Descriptor(descriptor) => Ok(descriptor),
    }
}
