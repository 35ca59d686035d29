//! Version vector with exceptions.
//!
//! Each site's entry records the highest counter seen from that site plus
//! the counters below it that have not arrived yet. Together they answer
//! "has this operation been applied?" in O(1), whatever order the mesh
//! delivered things in.
//!
//! ```text
//!  arrivals   1, 3, 2
//!  after 1    counter 1  exceptions {}
//!  after 3    counter 3  exceptions {2}
//!  after 2    counter 3  exceptions {}
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::SiteId;

/// Clock state for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub site_id: SiteId,
    pub counter: u64,
    #[serde(default)]
    pub exceptions: FxHashSet<u64>,
}

impl Version {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            counter: 0,
            exceptions: FxHashSet::default(),
        }
    }

    /// Records that operation `counter` from this site has been applied.
    pub fn update(&mut self, counter: u64) {
        if counter <= self.counter {
            self.exceptions.remove(&counter);
        } else if counter == self.counter + 1 {
            self.counter = counter;
        } else {
            self.exceptions.extend(self.counter + 1..counter);
            self.counter = counter;
        }
    }

    pub fn covers(&self, counter: u64) -> bool {
        counter <= self.counter && !self.exceptions.contains(&counter)
    }
}

/// Clock state for every site this replica has observed, its own included.
#[derive(Debug, Clone)]
pub struct VersionVector {
    local_site: SiteId,
    versions: FxHashMap<SiteId, Version>,
}

impl VersionVector {
    pub fn new(local_site: SiteId) -> Self {
        let mut versions = FxHashMap::default();
        versions.insert(local_site, Version::new(local_site));
        Self {
            local_site,
            versions,
        }
    }

    pub fn local_site(&self) -> SiteId {
        self.local_site
    }

    pub fn local_version(&self) -> &Version {
        // Inserted in `new` and never removed.
        &self.versions[&self.local_site]
    }

    /// Advances the local clock and returns the stamp for the new operation.
    pub fn increment(&mut self) -> Version {
        let local = self
            .versions
            .entry(self.local_site)
            .or_insert_with(|| Version::new(self.local_site));
        local.counter += 1;
        local.clone()
    }

    pub fn has_been_applied(&self, site_id: SiteId, counter: u64) -> bool {
        self.versions
            .get(&site_id)
            .is_some_and(|version| version.covers(counter))
    }

    pub fn update(&mut self, version: &Version) {
        self.versions
            .entry(version.site_id)
            .or_insert_with(|| Version::new(version.site_id))
            .update(version.counter);
    }

    pub fn get(&self, site_id: &SiteId) -> Option<&Version> {
        self.versions.get(site_id)
    }

    /// Every known version, ordered by site.
    pub fn snapshot(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.versions.values().cloned().collect();
        versions.sort_by_key(|v| v.site_id);
        versions
    }

    /// Takes over the clocks of a sync snapshot. The local entry is kept.
    pub fn adopt(&mut self, versions: impl IntoIterator<Item = Version>) {
        for version in versions {
            if version.site_id != self.local_site {
                self.versions.insert(version.site_id, version);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
