//! Static GCE vocabulary: the zones this crate will provision into, the
//! machine types each zone accepts, the region abbreviation table and the
//! container registries an image may be pulled from.

use crate::{EsflowError, Result};

/// zones nodes may be provisioned into
pub const ZONES: &[&str] = &[
    "asia-east1-a",
    "asia-east1-b",
    "asia-east1-c",
    "europe-west1-b",
    "europe-west1-c",
    "europe-west1-d",
    "us-central1-a",
    "us-central1-b",
    "us-central1-c",
    "us-central1-f",
    "us-east1-b",
    "us-east1-c",
    "us-east1-d",
    "us-west1-a",
    "us-west1-b",
    "us-west1-c",
];

/// container registries an image name may start with
pub const REGISTRIES: &[&str] = &["gcr.io", "us.gcr.io", "eu.gcr.io", "asia.gcr.io"];

const SHORT_REGIONS: &[(&str, &str)] = &[
    ("asia-east1", "ae1"),
    ("europe-west1", "ew1"),
    ("us-central1", "uc1"),
    ("us-east1", "ue1"),
    ("us-west1", "uw1"),
];

const STANDARD_MTYPES: &[&str] = &[
    "e2-medium",
    "e2-small",
    "e2-standard-2",
    "e2-standard-4",
    "e2-standard-8",
    "f1-micro",
    "g1-small",
    "n1-highmem-2",
    "n1-highmem-4",
    "n1-highmem-8",
    "n1-highmem-16",
    "n1-standard-1",
    "n1-standard-2",
    "n1-standard-4",
    "n1-standard-8",
    "n1-standard-16",
];

/// machine types a zone accepts; empty for zones outside the table
pub fn machine_types(zone: &str) -> &'static [&'static str] {
    if ZONES.contains(&zone) { STANDARD_MTYPES } else { &[] }
}

/// short abbreviation for a region, e.g. "us-east1" -> "ue1"
pub fn short_region(region: &str) -> Option<&'static str> {
    SHORT_REGIONS.iter().find(|(r, _)| *r == region).map(|(_, s)| *s)
}

/// all zones belonging to a region
pub fn zones_in_region(region: &str) -> Result<Vec<&'static str>> {
    if short_region(region).is_none() {
        return Err(EsflowError::Validation(format!("{region} is not a valid gce region")));
    }
    Ok(ZONES.iter().copied().filter(|zone| zone.rsplit_once('-').map(|(r, _)| r) == Some(region)).collect())
}
