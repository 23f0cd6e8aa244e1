// SPDX-License-Identifier: MIT OR Apache-2.0

//! Intervention point catalog.
//!
//! Enumerates the matched activation sites at which two models are
//! compared: the embedding and positional-embedding terms plus the
//! attention and MLP outputs of every layer. The catalog depends only on
//! the layer count, not on either model's shapes, so the same sequence of
//! sites applies to a base model and a compressed hypothesis model alike.

use std::fmt;
use std::str::FromStr;

use crate::error::{CircuitsError, Result};
use crate::hooks::HookPoint;

// ---------------------------------------------------------------------------
// SiteKind
// ---------------------------------------------------------------------------

/// The kind of an intervention site.
///
/// Used to filter the catalog down to a subset of site kinds, e.g.
/// `&[SiteKind::MlpOut]` to intervene only on MLP outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    /// Token-embedding term.
    Embed,
    /// Positional-embedding term.
    PosEmbed,
    /// Attention block output, per layer.
    AttnOut,
    /// MLP block output, per layer.
    MlpOut,
}

impl SiteKind {
    /// All four site kinds, in catalog order.
    pub const ALL: [Self; 4] = [Self::Embed, Self::PosEmbed, Self::AttnOut, Self::MlpOut];
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embed => write!(f, "hook_embed"),
            Self::PosEmbed => write!(f, "hook_pos_embed"),
            Self::AttnOut => write!(f, "hook_attn_out"),
            Self::MlpOut => write!(f, "hook_mlp_out"),
        }
    }
}

impl FromStr for SiteKind {
    type Err = CircuitsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hook_embed" => Ok(Self::Embed),
            "hook_pos_embed" => Ok(Self::PosEmbed),
            "hook_attn_out" => Ok(Self::AttnOut),
            "hook_mlp_out" => Ok(Self::MlpOut),
            other => Err(CircuitsError::Hook(format!("unknown site kind `{other}`"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Enumerate every intervention site for a `num_layers`-deep model,
/// filtered to the requested kinds.
///
/// The ordering is fixed so result sequences from repeated runs are
/// directly comparable: `Embed`, `PosEmbed`, then for each layer `l` in
/// `0..num_layers` the pair `AttnOut(l)`, `MlpOut(l)`. With all four
/// kinds requested this yields exactly `2 + 2 * num_layers` sites.
#[must_use]
pub fn all_intervention_sites(kinds: &[SiteKind], num_layers: usize) -> Vec<HookPoint> {
    let mut sites = Vec::new();

    if kinds.contains(&SiteKind::Embed) {
        sites.push(HookPoint::Embed);
    }
    if kinds.contains(&SiteKind::PosEmbed) {
        sites.push(HookPoint::PosEmbed);
    }
    for layer in 0..num_layers {
        if kinds.contains(&SiteKind::AttnOut) {
            sites.push(HookPoint::AttnOut(layer));
        }
        if kinds.contains(&SiteKind::MlpOut) {
            sites.push(HookPoint::MlpOut(layer));
        }
    }

    sites
}

/// Enumerate intervention sites, capped at `max_sites`.
///
/// The cap is a cost knob, not an error condition: when the catalog holds
/// more than `max_sites` entries, the first `max_sites` of the fixed
/// ordering are returned.
///
/// # Errors
///
/// Returns [`CircuitsError::Validation`] if `max_sites` is zero — an
/// evaluation over zero sites is meaningless and is rejected up front.
pub fn intervention_sites(
    kinds: &[SiteKind],
    num_layers: usize,
    max_sites: usize,
) -> Result<Vec<HookPoint>> {
    if max_sites == 0 {
        return Err(CircuitsError::Validation(
            "max_sites must be greater than 0".into(),
        ));
    }

    let mut sites = all_intervention_sites(kinds, num_layers);
    sites.truncate(max_sites);
    Ok(sites)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn full_catalog_count_and_order() {
        let sites = all_intervention_sites(&SiteKind::ALL, 2);
        assert_eq!(sites.len(), 2 + 2 * 2);
        assert_eq!(
            sites,
            vec![
                HookPoint::Embed,
                HookPoint::PosEmbed,
                HookPoint::AttnOut(0),
                HookPoint::MlpOut(0),
                HookPoint::AttnOut(1),
                HookPoint::MlpOut(1),
            ]
        );
    }

    #[test]
    fn filtered_catalog() {
        let sites = all_intervention_sites(&[SiteKind::MlpOut], 3);
        assert_eq!(
            sites,
            vec![
                HookPoint::MlpOut(0),
                HookPoint::MlpOut(1),
                HookPoint::MlpOut(2),
            ]
        );

        let sites = all_intervention_sites(&[SiteKind::Embed, SiteKind::PosEmbed], 3);
        assert_eq!(sites, vec![HookPoint::Embed, HookPoint::PosEmbed]);
    }

    #[test]
    fn cap_selects_prefix() {
        let all = all_intervention_sites(&SiteKind::ALL, 4);
        let capped = intervention_sites(&SiteKind::ALL, 4, 3).unwrap();
        assert_eq!(capped.len(), 3);
        assert_eq!(capped.as_slice(), all.get(..3).unwrap());
    }

    #[test]
    fn cap_larger_than_catalog_is_noop() {
        let capped = intervention_sites(&SiteKind::ALL, 1, 100).unwrap();
        assert_eq!(capped.len(), 4);
    }

    #[test]
    fn zero_cap_errors() {
        assert!(intervention_sites(&SiteKind::ALL, 1, 0).is_err());
    }

    #[test]
    fn site_kind_string_roundtrip() {
        for kind in SiteKind::ALL {
            let parsed: SiteKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("hook_resid_pre".parse::<SiteKind>().is_err());
    }
}
