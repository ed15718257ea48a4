mod common;

use common::{SimulatedMemory, boot};
use kernel_pmm::{
    FirmwareEntry, FirmwareRegionKind, FlatTopology, FrameHandle, FrameList, FrameState, Gaf,
    MAX_CPUS, MAX_FRAME_ORDER, MemoryAffinity, NodeId, NodeMask, PcpConfig, PhysicalAddress,
    PhysicalMemoryManager, PmmConfig, PmmError, ReclaimHook, ReclaimRequest, RegionType,
    RetryPolicy, StaticTopology, ZoneType, ingest_firmware_map,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Barrier, Mutex, OnceLock};
use std::thread;

type Pmm = PhysicalMemoryManager<'static, SimulatedMemory>;

const fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

fn flat_manager(base: u64, len: u64, config: PmmConfig) -> (&'static SimulatedMemory, Pmm) {
    let mem = SimulatedMemory::leak(base, len);
    let mut bm = boot(mem, 16);
    bm.add(pa(base), len, RegionType::Normal, 0).expect("add");
    let pmm = PhysicalMemoryManager::init(bm, &FlatTopology, config).expect("init");
    (mem, pmm)
}

fn affinity(domain: u32, base: u64, size: u64) -> MemoryAffinity {
    MemoryAffinity {
        proximity_domain: domain,
        base: pa(base),
        size,
    }
}

/// Allocates single frames from `nid` until it is empty.
fn drain_node(pmm: &Pmm, nid: NodeId) -> Vec<FrameHandle> {
    let mut held = Vec::new();
    while let Some(h) = pmm.alloc_frame_on(0, nid, Gaf::ONLY_THIS_NODE, 0, NodeMask::ALL) {
        held.push(h);
    }
    held
}

fn free_all(pmm: &Pmm, handles: Vec<FrameHandle>) {
    for h in handles {
        pmm.free_frame(0, h, 0);
    }
}

fn assert_zone_accounting(pmm: &Pmm) {
    for node in pmm.nodes() {
        for zone in node.zones() {
            assert_eq!(
                zone.present_frames(),
                zone.managed_frames() + zone.reserved_frames(),
                "{zone:?}"
            );
            assert!(zone.present_frames() <= zone.spanned_frames());
        }
    }
}

#[test]
fn normal_requests_fall_back_to_dma_on_a_small_machine() {
    let config = PmmConfig::default().with_pcp(PcpConfig::DISABLED);
    let (_, pmm) = flat_manager(0x10_0000, 0x10_0000, config);

    let dma = pmm.zone(0, ZoneType::Dma).expect("all memory is below 16 MiB");
    assert!(pmm.zone(0, ZoneType::Dma32).is_none());
    assert!(pmm.zone(0, ZoneType::Normal).is_none());
    assert_eq!(pmm.present_frames_count(), 256);
    assert_zone_accounting(&pmm);

    let before = dma.managed_frames();
    let h = pmm
        .alloc_frame(0, Gaf::empty(), 0, NodeMask::ALL)
        .expect("falls back to DMA");
    assert!(dma.contains(h.pfn()));
    assert_eq!(dma.managed_frames(), before - 1);

    pmm.free_frame(0, h, 0);
    assert_eq!(dma.managed_frames(), before);
    assert_eq!(pmm.free_frames_count(), before);
}

#[test]
fn blocks_are_aligned_to_their_order() {
    let (_, pmm) = flat_manager(0x40_0000, 0x40_0000, PmmConfig::default().single_zone());
    let cpu = pmm.cpu(0);
    let before = pmm.free_frames_count();

    let mut held = Vec::new();
    for order in 0..=4 {
        let h = cpu.alloc_frame(Gaf::empty(), order, NodeMask::ALL).expect("alloc");
        assert!(h.phys().is_aligned(4096 << order), "{h:?} order {order}");
        let frame = pmm.phys_to_frame(h.phys()).expect("frame");
        assert_eq!(frame.order(), order);
        assert_eq!(frame.refcount(), 1);
        held.push((h, order));
    }
    assert_eq!(pmm.free_frames_count(), before - 31);

    for (h, order) in held {
        cpu.free_frame(h, order);
    }
    assert_eq!(pmm.free_frames_count(), before);
    assert!(
        cpu.alloc_frame(Gaf::empty(), MAX_FRAME_ORDER + 1, NodeMask::ALL)
            .is_none()
    );
}

#[test]
fn only_this_node_never_leaves_the_preferred_node() {
    let mem = SimulatedMemory::leak(0x10_0000, 0x20_0000);
    let mut bm = boot(mem, 16);
    bm.add(pa(0x10_0000), 0x20_0000, RegionType::Normal, 0).expect("add");
    let affinities = [affinity(7, 0x10_0000, 0x10_0000), affinity(9, 0x20_0000, 0x10_0000)];
    let topology = StaticTopology::new(&affinities, &[]);
    let config = PmmConfig::default()
        .single_zone()
        .with_pcp(PcpConfig::DISABLED)
        .with_cpus(2);
    let pmm = PhysicalMemoryManager::init(bm, &topology, config).expect("init");

    assert_eq!(pmm.node_states().online(), NodeMask::single(0).with(1));
    assert_eq!(pmm.distance(0, 1), 20);
    assert_eq!(pmm.distance(1, 1), 10);
    let node1 = pmm.node(1).expect("node 1");
    assert_eq!(node1.start_pfn().base(), pa(0x20_0000));
    assert_zone_accounting(&pmm);

    pmm.set_cpu_node(1, 1).expect("bind");
    assert_eq!(pmm.cpu(1).node().map(|n| n.id()), Some(1));
    let local = pmm
        .cpu(1)
        .alloc_frame(Gaf::ONLY_THIS_NODE, 0, NodeMask::ALL)
        .expect("local frame");
    assert!(local.phys() >= pa(0x20_0000));
    assert_eq!(pmm.phys_to_frame(local.phys()).map(|f| f.node()), Some(1));

    let node0_free = pmm.node(0).expect("node 0").managed_frames();
    let mut held = drain_node(&pmm, 1);
    assert_eq!(node1.managed_frames(), 0);
    assert!(
        pmm.cpu(1)
            .alloc_frame(Gaf::ONLY_THIS_NODE, 0, NodeMask::ALL)
            .is_none()
    );
    assert_eq!(pmm.node(0).expect("node 0").managed_frames(), node0_free);

    assert!(pmm.cpu(1).alloc_frame(Gaf::empty(), 0, NodeMask::single(1)).is_none());
    assert!(pmm.alloc_frame_on(0, 1, Gaf::ONLY_THIS_NODE, 0, NodeMask::ALL).is_none());
    let hinted = pmm
        .cpu(0)
        .alloc_frame_on(1, Gaf::empty(), 0, NodeMask::ALL)
        .expect("named node is only a preference");
    assert!(hinted.phys() < pa(0x20_0000));
    held.push(hinted);
    let remote = pmm
        .cpu(1)
        .alloc_frame(Gaf::empty(), 0, NodeMask::ALL)
        .expect("falls back to node 0");
    assert!(remote.phys() < pa(0x20_0000));

    held.push(local);
    held.push(remote);
    free_all(&pmm, held);
    assert_zone_accounting(&pmm);
}

#[test]
fn fallback_follows_distance_order() {
    let mem = SimulatedMemory::leak(0x10_0000, 0x30_0000);
    let mut bm = boot(mem, 16);
    bm.add(pa(0x10_0000), 0x30_0000, RegionType::Normal, 0).expect("add");
    let affinities = [
        affinity(0, 0x10_0000, 0x10_0000),
        affinity(1, 0x20_0000, 0x10_0000),
        affinity(2, 0x30_0000, 0x10_0000),
    ];
    let distances = [
        (0, 1, 30),
        (1, 0, 30),
        (0, 2, 15),
        (2, 0, 15),
        (1, 2, 20),
        (2, 1, 20),
    ];
    let topology = StaticTopology::new(&affinities, &distances);
    let config = PmmConfig::default().single_zone().with_pcp(PcpConfig::DISABLED);
    let pmm = PhysicalMemoryManager::init(bm, &topology, config).expect("init");

    assert_eq!(pmm.node(0).expect("node 0").route(), &[0, 2, 1]);
    assert_eq!(pmm.node(1).expect("node 1").route(), &[1, 2, 0]);

    let held = drain_node(&pmm, 0);
    let near = pmm.alloc_frame(0, Gaf::empty(), 0, NodeMask::ALL).expect("node 2");
    assert!(near.phys() >= pa(0x30_0000));
    let masked = pmm
        .alloc_frame(0, Gaf::empty(), 0, NodeMask::ALL.without(2))
        .expect("node 1");
    assert!(masked.phys() >= pa(0x20_0000) && masked.phys() < pa(0x30_0000));

    free_all(&pmm, held);
    pmm.free_frame(0, near, 0);
    pmm.free_frame(0, masked, 0);
    assert_zone_accounting(&pmm);
}

#[test]
fn cpu_binding_is_validated() {
    let (_, pmm) = flat_manager(0x10_0000, 0x10_0000, PmmConfig::default());
    assert_eq!(pmm.set_cpu_node(MAX_CPUS, 0), Err(PmmError::InvalidArguments));
    assert_eq!(pmm.set_cpu_node(0, 5), Err(PmmError::InvalidArguments));
    assert_eq!(pmm.cpu_node(3), 0);
    assert!(pmm.node(5).is_none());
    pmm.set_cpu_node(3, 0).expect("node 0 is online");
}

#[test]
fn batch_allocation_is_all_or_nothing() {
    let config = PmmConfig::default().single_zone().with_pcp(PcpConfig::DISABLED);
    let (_, pmm) = flat_manager(0x10_0000, 0x10_0000, config);
    let free = pmm.free_frames_count();

    let mut out = FrameList::new();
    pmm.alloc_frames(0, Gaf::empty(), &mut out, 11).expect("11 frames");
    assert_eq!(out.len(), 3, "8 + 2 + 1");
    assert_eq!(out.frame_count(pmm.frames()), 11);
    assert_eq!(pmm.free_frames_count(), free - 11);
    pmm.free_frames(0, out);
    assert_eq!(pmm.free_frames_count(), free);

    let mut out = FrameList::new();
    assert_eq!(
        pmm.alloc_frames(0, Gaf::empty(), &mut out, free + 1),
        Err(PmmError::OutOfMemory)
    );
    assert!(out.is_empty());
    assert_eq!(pmm.free_frames_count(), free);

    assert_eq!(
        pmm.alloc_frames(0, Gaf::empty(), &mut out, 0),
        Err(PmmError::InvalidArguments)
    );

    let got = pmm.alloc_frames_bulk(0, Gaf::empty(), &mut out, 5);
    assert_eq!(got, 5);
    assert_eq!(out.len(), 5);
    pmm.free_frames(0, out);
    assert_eq!(pmm.free_frames_count(), free);
}

/// Hands back one stashed frame per reclaim call.
#[derive(Default)]
struct StashReclaim {
    pmm: OnceLock<&'static Pmm>,
    stash: Mutex<Vec<FrameHandle>>,
    calls: AtomicUsize,
    kicks: AtomicUsize,
    last_attempt: AtomicU32,
}

impl ReclaimHook for StashReclaim {
    fn reclaim(&self, request: &ReclaimRequest) -> usize {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.last_attempt.store(request.attempt, Ordering::Relaxed);
        let (Some(pmm), Some(h)) = (self.pmm.get(), self.stash.lock().unwrap().pop()) else {
            return 0;
        };
        pmm.free_frame(0, h, 0);
        1
    }

    fn kick(&self, _node: NodeId, _zone: ZoneType) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn never_fail_retries_through_the_reclaim_hook() {
    let config = PmmConfig::default()
        .single_zone()
        .with_pcp(PcpConfig::DISABLED)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff_spins: 1,
        });
    let (_, pmm) = flat_manager(0x10_0000, 0x10_0000, config);
    let pmm: &'static mut Pmm = Box::leak(Box::new(pmm));
    let hook: &'static StashReclaim = Box::leak(Box::default());
    pmm.set_reclaim_hook(hook);
    let pmm: &'static Pmm = pmm;
    assert!(hook.pmm.set(pmm).is_ok());

    let initial = pmm.free_frames_count();
    *hook.stash.lock().unwrap() = drain_node(pmm, 0);
    assert_eq!(pmm.free_frames_count(), 0);

    assert!(pmm.alloc_frame(0, Gaf::empty(), 0, NodeMask::ALL).is_none());
    assert_eq!(hook.calls.load(Ordering::Relaxed), 0, "plain requests do not reclaim");

    let mut kept = Vec::new();
    kept.push(
        pmm.alloc_frame(0, Gaf::NEVER_FAIL | Gaf::RECLAIM, 0, NodeMask::ALL)
            .expect("reclaimed frame"),
    );
    assert_eq!(hook.calls.load(Ordering::Relaxed), 1);
    assert_eq!(hook.kicks.load(Ordering::Relaxed), 1, "zone is below its watermark");

    kept.push(
        pmm.alloc_frame(0, Gaf::DIRECTLY_RECLAIM, 0, NodeMask::ALL)
            .expect("one direct reclaim"),
    );
    assert_eq!(hook.calls.load(Ordering::Relaxed), 2);

    kept.append(&mut hook.stash.lock().unwrap());
    assert!(pmm.alloc_frame(0, Gaf::NEVER_FAIL, 0, NodeMask::ALL).is_none());
    assert_eq!(hook.calls.load(Ordering::Relaxed), 5, "bounded by max_attempts");
    assert_eq!(hook.last_attempt.load(Ordering::Relaxed), 3);

    free_all(pmm, kept);
    assert_eq!(pmm.free_frames_count(), initial);
}

#[test]
fn zero_flag_clears_recycled_frames() {
    let config = PmmConfig::default().single_zone().with_pcp(PcpConfig::DISABLED);
    let (mem, pmm) = flat_manager(0x10_0000, 0x10_0000, config);

    let held = drain_node(&pmm, 0);
    for h in &held {
        mem.bytes(h.phys(), 4096).fill(0xaa);
    }
    free_all(&pmm, held);

    let dirty = pmm.alloc_frame(0, Gaf::empty(), 0, NodeMask::ALL).expect("frame");
    assert!(mem.bytes(dirty.phys(), 4096).iter().all(|&b| b == 0xaa));
    let clean = pmm.alloc_frame(0, Gaf::ZERO, 1, NodeMask::ALL).expect("frames");
    assert!(mem.bytes(clean.phys(), 8192).iter().all(|&b| b == 0));

    pmm.free_frame(0, dirty, 0);
    pmm.free_frame(0, clean, 1);
}

#[test]
fn firmware_map_drives_frame_state() {
    let mem = SimulatedMemory::leak(0, 0x80_0000);
    let mut bm = boot(mem, 16);
    let map = [
        FirmwareEntry::new(0, 0x9_f000, FirmwareRegionKind::Available),
        FirmwareEntry::new(0x9_f000, 0x6_1000, FirmwareRegionKind::Reserved),
        FirmwareEntry::new(0x10_0000, 0x70_0000, FirmwareRegionKind::Available),
        FirmwareEntry::new(0x20_0000, 0x1000, FirmwareRegionKind::Bad),
        FirmwareEntry::new(0x7f_0000, 0x1_0000, FirmwareRegionKind::AcpiReclaimable),
    ];
    ingest_firmware_map(&mut bm, &map).expect("ingest");
    let pmm = PhysicalMemoryManager::init(bm, &FlatTopology, PmmConfig::default()).expect("init");

    let dma = pmm.zone(0, ZoneType::Dma).expect("dma");
    assert_eq!(dma.present_frames(), 0x9f + 0x700 - 1);
    assert_zone_accounting(&pmm);

    let bad = pmm.phys_to_frame(pa(0x20_0000)).expect("covered");
    assert!(!bad.is_present());
    let hole = pmm.phys_to_frame(pa(0xa_0000)).expect("covered");
    assert!(!hole.is_present());
    let acpi = pmm.phys_to_frame(pa(0x7f_8000)).expect("covered");
    assert!(acpi.is_present());
    assert!(acpi.states().contains(FrameState::RESERVED));
    assert!(pmm.phys_to_frame(pa(0x80_0000)).is_none());

    let free = pmm.free_frames_count();
    let mut seen = HashSet::new();
    while let Some(h) = pmm.alloc_frame(0, Gaf::DMA, 0, NodeMask::ALL) {
        let addr = h.phys().as_u64();
        assert_ne!(addr, 0x20_0000, "bad frame handed out");
        assert!(!(0x9_f000..0x10_0000).contains(&addr), "firmware hole handed out");
        assert!(!(0x7f_0000..0x80_0000).contains(&addr), "ACPI tables handed out");
        assert!(seen.insert(addr), "{h:?} handed out twice");
        std::mem::forget(h);
    }
    assert_eq!(seen.len() as u64, free);
}

#[test]
fn concurrent_alloc_and_cross_cpu_free_keep_counts() {
    const CPUS: usize = 4;
    const ROUNDS: usize = 300;

    let config = PmmConfig::default().single_zone().with_cpus(CPUS);
    let (_, pmm) = flat_manager(0x10_0000, 0x100_0000, config);
    let initial = pmm.free_frames_count();
    let barrier = Barrier::new(CPUS);
    let mailbox: Mutex<Vec<(FrameHandle, u32)>> = Mutex::new(Vec::new());

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let (pmm, barrier, mailbox) = (&pmm, &barrier, &mailbox);
            s.spawn(move || {
                let alloc = pmm.cpu(cpu);
                let mut held: Vec<(FrameHandle, u32)> = Vec::new();
                barrier.wait();
                for round in 0..ROUNDS {
                    let order = ((round + cpu) % 4) as u32;
                    if let Some(h) = alloc.alloc_frame(Gaf::empty(), order, NodeMask::ALL) {
                        held.push((h, order));
                    }
                    if round % 3 == 0
                        && let Some(block) = held.pop()
                    {
                        mailbox.lock().unwrap().push(block);
                    }
                    if round % 5 == 0 {
                        let foreign = mailbox.lock().unwrap().pop();
                        if let Some((h, order)) = foreign {
                            alloc.free_frame(h, order);
                        }
                    }
                    if held.len() > 32 {
                        for (h, order) in held.drain(..16) {
                            alloc.free_frame(h, order);
                        }
                    }
                }
                barrier.wait();
                for (h, order) in held {
                    alloc.free_frame(h, order);
                }
            });
        }
    });

    for (h, order) in mailbox.into_inner().unwrap() {
        pmm.free_frame(0, h, order);
    }
    assert_eq!(pmm.free_frames_count(), initial);

    pmm.drain_all_caches();
    let zone = pmm.zone(0, ZoneType::Normal).expect("normal");
    assert_eq!(zone.cached_frames(), 0);
    assert_eq!(zone.free_list_frames(), zone.managed_frames());
    assert_eq!(pmm.free_frames_count(), initial);
    assert_zone_accounting(&pmm);
}
