//! Offer matching across backends.
//!
//! Every backend is asked for offers concurrently. Per-backend lists come
//! back price-sorted and are merged with a k-way merge, then partitioned so
//! that offers worth attempting come first. Price order is kept inside each
//! partition.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use futures_util::future::join_all;
use stratus_resources::{InstanceOfferWithAvailability, Requirements};
use tracing::{debug, error, warn};

use crate::backends::Backend;
use crate::models::{JobProvisioningData, OfferFilter};

/// An offer together with the backend that sells it.
pub type BackendOffer = (Arc<dyn Backend>, InstanceOfferWithAvailability);

/// Offers of all `backends` matching `requirements`, ranked.
///
/// Available offers come first, then unavailable ones, each group in
/// ascending price. A backend that fails is logged and left out of this
/// round. With `exclude_not_available`, only available offers are returned.
pub async fn get_instance_offers(
    backends: &[Arc<dyn Backend>],
    requirements: &Requirements,
    exclude_not_available: bool,
) -> Vec<BackendOffer> {
    let results = join_all(backends.iter().map(|backend| async move {
        let offers = backend.compute().get_offers(requirements).await;
        (backend, offers)
    }))
    .await;

    let mut per_backend = Vec::with_capacity(results.len());
    for (backend, result) in results {
        match result {
            Ok(mut offers) => {
                offers.sort_by(|a, b| a.price().total_cmp(&b.price()));
                per_backend.push(
                    offers
                        .into_iter()
                        .map(|offer| (backend.clone(), offer))
                        .collect::<Vec<_>>(),
                );
            }
            Err(e) if e.is_backend_error() => {
                warn!(backend = %backend.backend_type(), error = %e, "Failed to get offers from backend");
            }
            Err(e) => {
                error!(backend = %backend.backend_type(), error = ?e, "Unexpected error getting offers from backend");
            }
        }
    }

    let merged = merge_by_price(per_backend);
    let (available, unavailable): (Vec<_>, Vec<_>) = merged
        .into_iter()
        .partition(|(_, offer)| offer.availability.is_available());

    debug!(
        available = available.len(),
        unavailable = unavailable.len(),
        "Collected instance offers"
    );

    if exclude_not_available {
        available
    } else {
        available.into_iter().chain(unavailable).collect()
    }
}

/// Heap entry: the head of one per-backend list.
struct Head {
    price: f64,
    list: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .total_cmp(&other.price)
            .then(self.list.cmp(&other.list))
    }
}

/// Merges price-sorted lists into one price-sorted list.
///
/// Equal prices keep the order of the input lists.
fn merge_by_price(lists: Vec<Vec<BackendOffer>>) -> Vec<BackendOffer> {
    let total = lists.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = lists.into_iter().map(|l| l.into_iter().peekable()).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (list, iter) in iters.iter_mut().enumerate() {
        if let Some((_, offer)) = iter.peek() {
            heap.push(Reverse(Head {
                price: offer.price(),
                list,
            }));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse(head)) = heap.pop() {
        let iter = &mut iters[head.list];
        if let Some(item) = iter.next() {
            merged.push(item);
        }
        if let Some((_, offer)) = iter.peek() {
            heap.push(Reverse(Head {
                price: offer.price(),
                list: head.list,
            }));
        }
    }
    merged
}

/// Offers for a job or instance, after profile and placement filters.
///
/// `master` restricts offers to the backend, region and zone of an already
/// provisioned master job, so multi-node jobs land together.
pub async fn get_offers_by_requirements(
    backends: &[Arc<dyn Backend>],
    filter: &OfferFilter,
    requirements: &Requirements,
    exclude_not_available: bool,
    master: Option<&JobProvisioningData>,
) -> Vec<BackendOffer> {
    let backends: Vec<_> = backends
        .iter()
        .filter(|b| filter.allows_backend(b.backend_type()))
        .filter(|b| master.is_none_or(|m| m.backend == b.backend_type()))
        .cloned()
        .collect();

    let mut offers = get_instance_offers(&backends, requirements, exclude_not_available).await;
    offers.retain(|(_, offer)| {
        filter.allows(&offer.offer)
            && requirements
                .max_price
                .is_none_or(|max| offer.price() <= max)
    });

    if let Some(master) = master {
        offers.retain_mut(|(_, offer)| {
            if offer.offer.region != master.region {
                return false;
            }
            match &master.availability_zone {
                Some(zone) if !offer.offer.availability_zones.is_empty() => {
                    if !offer.offer.availability_zones.contains(zone) {
                        return false;
                    }
                    offer.offer.availability_zones = vec![zone.clone()];
                    true
                }
                _ => true,
            }
        });
    }
    offers
}
