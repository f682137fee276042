use std::sync::atomic::{AtomicU64, Ordering};

use easy_parallel::Parallel;
use elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar, Secp256k1};
use rand_core::OsRng;

use crate::{
    config::Config,
    error::LtsError,
    ledger::{wait_proof, ContractKind, Instruction, LedgerClient, MemoryLedger, Proof},
    records::{DarcId, Dkid, InstanceId, LtsInstanceInfo, Read, Record, Write},
    service::{DecryptKey, DecryptKeyNt, DecryptKeyReply, LocalCluster, ReshareLtsReply},
    store::LtsPublic,
};

fn config() -> Config {
    Config {
        proof_interval_ms: 1,
        ..Config::default()
    }
}

/// Store a write of `key` and a read of it on a ledger without lag.
fn write_and_read(
    ledger: &MemoryLedger<Secp256k1>,
    lts: InstanceId,
    x: &AffinePoint,
    key: &[u8],
) -> (DecryptKey, Scalar) {
    let write = Write::<Secp256k1>::new(&mut OsRng, lts, DarcId::default(), x, key).unwrap();
    let ix = Instruction::spawn_write(InstanceId::default(), &write, 1);
    let write_id = ledger.add_transaction(ix.into()).unwrap()[0];
    let xc = Scalar::random(&mut OsRng);
    let read = Read::<Secp256k1> {
        write: write_id,
        xc: (ProjectivePoint::GENERATOR * xc).to_affine(),
    };
    let read_id = ledger
        .add_transaction(Instruction::spawn_read(&read, 1).into())
        .unwrap()[0];
    let request = DecryptKey {
        read: ledger.get_proof(&read_id).unwrap(),
        write: ledger.get_proof(&write_id).unwrap(),
    };
    (request, xc)
}

/// A cluster holding one secret, with a ledger authorizing its use.
struct Setup {
    cluster: LocalCluster<Secp256k1>,
    ledger: MemoryLedger<Secp256k1>,
    config: Config,
    counter: AtomicU64,
    lts: InstanceId,
    x: AffinePoint,
}

impl Setup {
    fn new(nodes: usize, roster: impl IntoIterator<Item = usize>) -> Self {
        let config = config();
        let cluster = LocalCluster::new(nodes, config.clone());
        // New values take one lookup to show up, so every proof gets polled for.
        let ledger = MemoryLedger::with_lag(1);
        cluster.authorize(ledger.id());

        let info = LtsInstanceInfo {
            roster: cluster.roster(roster),
        };
        let ix = Instruction::spawn_lts(InstanceId::default(), &info, 0);
        let lts = ledger.add_transaction(ix.into()).unwrap()[0];
        let proof = smol::block_on(wait_proof(&ledger, &lts, &config)).unwrap();
        let reply = cluster.create_lts(&proof).unwrap();
        assert_eq!(reply.instance_id, lts);
        assert_eq!(reply.ledger_id, ledger.id());

        Self {
            cluster,
            ledger,
            config,
            counter: AtomicU64::new(1),
            lts,
            x: reply.x,
        }
    }

    fn proof(&self, id: &InstanceId) -> Proof {
        smol::block_on(wait_proof(&self.ledger, id, &self.config)).unwrap()
    }

    fn submit(&self, ix: impl FnOnce(u64) -> Instruction) -> Proof {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = self.ledger.add_transaction(ix(counter).into()).unwrap()[0];
        self.proof(&id)
    }

    fn write(&self, key: &[u8]) -> Proof {
        let write =
            Write::<Secp256k1>::new(&mut OsRng, self.lts, DarcId::default(), &self.x, key).unwrap();
        self.submit(|c| Instruction::spawn_write(InstanceId::default(), &write, c))
    }

    fn read_with(&self, write: &Proof, xc: &Scalar) -> Proof {
        let read = Read::<Secp256k1> {
            write: write.instance_id,
            xc: (ProjectivePoint::GENERATOR * xc).to_affine(),
        };
        self.submit(|c| Instruction::spawn_read(&read, c))
    }

    fn read(&self, write: &Proof) -> (Proof, Scalar) {
        let xc = Scalar::random(&mut OsRng);
        (self.read_with(write, &xc), xc)
    }

    fn decrypt(&self, write: &Proof, read: &Proof) -> Result<DecryptKeyReply<Secp256k1>, LtsError> {
        self.cluster.decrypt_key(&DecryptKey {
            read: read.clone(),
            write: write.clone(),
        })
    }

    fn reshare(&self, roster: impl IntoIterator<Item = usize>) -> Result<ReshareLtsReply, LtsError> {
        let info = LtsInstanceInfo {
            roster: self.cluster.roster(roster),
        };
        let proof = self.submit(|c| Instruction::reshare_lts(self.lts, &info, c));
        self.cluster.reshare_lts(&proof)
    }

    /// What node `i` holds of our secret.
    fn public(&self, i: usize) -> Option<LtsPublic<Secp256k1>> {
        self.cluster.node(i).lts_public(&self.ledger.id(), &self.lts)
    }

    /// The signing keys of the latest roster.
    fn publics(&self) -> Vec<AffinePoint> {
        (0..self.cluster.len())
            .filter_map(|i| self.public(i))
            .max_by_key(|public| public.epoch)
            .unwrap()
            .roster
            .publics()
    }

    fn dkid(&self, write: &Proof, read: &Proof) -> Dkid {
        Dkid::compute(
            &write.write::<Secp256k1>().unwrap(),
            &read.read::<Secp256k1>().unwrap(),
        )
    }
}

#[test]
fn test_decrypt_key() {
    let setup = Setup::new(5, 0..5);

    let write = setup.write(b"secret key 1");
    let (read, xc) = setup.read(&write);
    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.x, setup.x);
    assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");

    // Someone else's key pair, used once for this read.
    let write = setup.write(b"secret key 2");
    let ephemeral = Scalar::random(&mut OsRng);
    let read = setup.read_with(&write, &ephemeral);
    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.recover_key(&ephemeral).unwrap(), b"secret key 2");
}

#[test]
fn test_mismatched_pair_is_refused() {
    let setup = Setup::new(4, 0..4);
    let write1 = setup.write(b"secret key 1");
    let write2 = setup.write(b"secret key 2");
    let (read1, _) = setup.read(&write1);

    assert!(matches!(
        setup.decrypt(&write2, &read1),
        Err(LtsError::ReadWriteMismatch { .. })
    ));
    let request = DecryptKeyNt {
        dkid: setup.dkid(&write1, &read1),
        is_reenc: false,
        write: write2,
        read: read1,
    };
    assert!(matches!(
        setup.cluster.decrypt_key_nt(&request),
        Err(LtsError::ReadWriteMismatch { .. })
    ));
}

#[test]
fn test_signed_decryption() {
    let setup = Setup::new(5, 0..5);
    let write = setup.write(b"secret key 1");
    let (read, xc) = setup.read(&write);
    let dkid = setup.dkid(&write, &read);
    let publics = setup.publics();
    let mut request = DecryptKeyNt {
        dkid,
        is_reenc: true,
        write,
        read,
    };

    // Re-encryption is served on a fresh statement.
    let reply = setup.cluster.decrypt_key_nt(&request).unwrap();
    assert_eq!(reply.x, setup.x);
    reply.verify(&dkid, &publics).unwrap();
    assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");

    let write = setup.write(b"secret key 2");
    let (read, _) = setup.read(&write);
    let dkid2 = setup.dkid(&write, &read);
    let base = setup
        .cluster
        .decrypt_key_nt(&DecryptKeyNt {
            dkid: dkid2,
            is_reenc: false,
            write,
            read,
        })
        .unwrap();
    base.verify(&dkid2, &publics).unwrap();
    assert_eq!(base.recover_base_key().unwrap(), b"secret key 2");

    let mut altered = dkid;
    altered.0[31] ^= 1;
    assert!(matches!(
        reply.verify(&altered, &publics),
        Err(LtsError::SignatureInvalid)
    ));
    let mut forged = reply.clone();
    forged.xhat_enc = (ProjectivePoint::from(reply.xhat_enc) + ProjectivePoint::GENERATOR).to_affine();
    assert!(matches!(
        forged.verify(&dkid, &publics),
        Err(LtsError::SignatureInvalid)
    ));

    request.dkid = altered;
    assert!(matches!(
        setup.cluster.decrypt_key_nt(&request),
        Err(LtsError::StatementMismatch(_))
    ));
}

#[test]
fn test_reshare_same_roster() {
    let setup = Setup::new(5, 0..5);
    let write = setup.write(b"before");
    let (read, xc) = setup.read(&write);

    for epoch in 1..=2 {
        let reply = setup.reshare(0..5).unwrap();
        assert_eq!(reply.epoch, epoch);
        assert_eq!(reply.completed.len(), 5);
    }
    for i in 0..5 {
        let public = setup.public(i).unwrap();
        assert_eq!(public.public_key(), setup.x);
        assert_eq!(public.epoch, 2);
    }

    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.recover_key(&xc).unwrap(), b"before");
    let write = setup.write(b"after");
    let (read, xc) = setup.read(&write);
    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.recover_key(&xc).unwrap(), b"after");
}

#[test]
fn test_reshare_changes_roster() {
    let setup = Setup::new(7, 0..5);
    let write = setup.write(b"secret key 1");
    let (read, xc) = setup.read(&write);

    let reply = setup.reshare(0..6).unwrap();
    assert_eq!(reply.completed.len(), 6);
    assert!(setup.public(5).is_some());

    // Node 0 deals its share away, and then forgets it.
    let reply = setup.reshare(1..7).unwrap();
    assert_eq!(reply.completed.len(), 7);
    assert_eq!(reply.epoch, 2);
    assert!(setup.public(0).is_none());
    let public = setup.public(6).unwrap();
    assert_eq!(public.public_key(), setup.x);
    assert_eq!(public.threshold, 5);

    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.x, setup.x);
    assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");
}

#[test]
fn test_reshare_to_disjoint_roster_is_rejected() {
    let setup = Setup::new(8, 0..4);
    let info = LtsInstanceInfo {
        roster: setup.cluster.roster(4..8),
    };
    assert!(setup
        .ledger
        .add_transaction(Instruction::reshare_lts(setup.lts, &info, 99).into())
        .is_err());

    // Even with a proof for it, the nodes refuse.
    let proof = Proof {
        ledger_id: setup.ledger.id(),
        instance_id: setup.lts,
        contract: ContractKind::LongTermSecret.id().to_string(),
        value: Record::LtsInstanceInfo(info).encode(),
    };
    assert!(matches!(
        setup.cluster.reshare_lts(&proof),
        Err(LtsError::DisjointRosterRejected)
    ));
    for i in 0..4 {
        assert_eq!(setup.public(i).unwrap().epoch, 0);
    }
    for i in 4..8 {
        assert!(setup.cluster.node(i).store().is_empty());
    }
}

#[test]
fn test_stale_node_is_left_out() {
    // Wherever the stale node sits in the node order.
    for stale in [0, 4] {
        let setup = Setup::new(5, 0..5);
        let write = setup.write(b"secret key 1");
        let (read, xc) = setup.read(&write);

        setup.cluster.set_online(stale, false);
        let reply = setup.reshare((0..5).filter(|i| *i != stale)).unwrap();
        assert_eq!(reply.completed.len(), 4);
        setup.cluster.set_online(stale, true);

        assert_eq!(setup.public(stale).unwrap().epoch, 0);
        let reply = setup.decrypt(&write, &read).unwrap();
        assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");

        let request = DecryptKeyNt {
            dkid: setup.dkid(&write, &read),
            is_reenc: true,
            write,
            read,
        };
        let reply = setup.cluster.decrypt_key_nt(&request).unwrap();
        reply.verify(&request.dkid, &setup.publics()).unwrap();
        assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");
    }
}

#[test]
fn test_offline_nodes() {
    let setup = Setup::new(5, 0..5);
    let write = setup.write(b"secret key 1");
    let (read, xc) = setup.read(&write);

    setup.cluster.set_online(2, false);
    let reply = setup.decrypt(&write, &read).unwrap();
    assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");

    setup.cluster.set_online(3, false);
    assert!(matches!(
        setup.decrypt(&write, &read),
        Err(LtsError::QuorumUnavailable {
            needed: 4,
            available: 3
        })
    ));

    // Generating a secret needs the whole roster.
    let info = LtsInstanceInfo {
        roster: setup.cluster.roster(0..5),
    };
    let proof = setup.submit(|c| Instruction::spawn_lts(InstanceId::default(), &info, c));
    assert!(matches!(
        setup.cluster.create_lts(&proof),
        Err(LtsError::QuorumUnavailable { .. })
    ));
}

#[test]
fn test_unauthorized_ledger() {
    let setup = Setup::new(5, 0..5);
    let other = MemoryLedger::<Secp256k1>::new();
    let info = LtsInstanceInfo {
        roster: setup.cluster.roster(1..5),
    };
    let ix = Instruction::spawn_lts(InstanceId::default(), &info, 0);
    let lts = other.add_transaction(ix.into()).unwrap()[0];
    let proof = other.get_proof(&lts).unwrap();

    assert!(matches!(
        setup.cluster.create_lts(&proof),
        Err(LtsError::UnauthorizedLedger(id)) if id == other.id()
    ));
    for i in 1..5 {
        setup.cluster.node(i).authorize(other.id());
    }
    let reply = setup.cluster.create_lts(&proof).unwrap();
    assert_ne!(reply.x, setup.x);

    // Node 0 turns the request down, the roster serves it anyway.
    let (request, xc) = write_and_read(&other, lts, &reply.x, b"secret key 1");
    assert!(matches!(
        setup.cluster.node(0).prepare_decrypt(&request),
        Err(LtsError::UnauthorizedLedger(_))
    ));
    let reply = setup.cluster.decrypt_key(&request).unwrap();
    assert_eq!(reply.recover_key(&xc).unwrap(), b"secret key 1");
}

#[test]
fn test_same_instance_on_two_ledgers() {
    let setup = Setup::new(4, 0..4);
    let other = MemoryLedger::<Secp256k1>::new();
    setup.cluster.authorize(other.id());

    // The same spawn names the same instance on both ledgers.
    let info = LtsInstanceInfo {
        roster: setup.cluster.roster(0..4),
    };
    let ix = Instruction::spawn_lts(InstanceId::default(), &info, 0);
    let lts = other.add_transaction(ix.into()).unwrap()[0];
    assert_eq!(lts, setup.lts);
    let reply = setup
        .cluster
        .create_lts(&other.get_proof(&lts).unwrap())
        .unwrap();
    assert_eq!(reply.ledger_id, other.id());
    assert_ne!(reply.x, setup.x);
    for i in 0..4 {
        let node = setup.cluster.node(i);
        assert_eq!(node.lts_public(&other.id(), &lts).unwrap().public_key(), reply.x);
        assert_eq!(setup.public(i).unwrap().public_key(), setup.x);
    }

    let write = setup.write(b"first ledger");
    let (read, xc) = setup.read(&write);
    let first = setup.decrypt(&write, &read).unwrap();
    assert_eq!(first.x, setup.x);
    assert_eq!(first.recover_key(&xc).unwrap(), b"first ledger");

    let (request, xc) = write_and_read(&other, lts, &reply.x, b"second ledger");
    let second = setup.cluster.decrypt_key(&request).unwrap();
    assert_eq!(second.x, reply.x);
    assert_eq!(second.recover_key(&xc).unwrap(), b"second ledger");
}

#[test]
fn test_wrong_record_kind() {
    let setup = Setup::new(4, 0..4);
    let write = setup.write(b"secret key 1");

    assert!(matches!(
        setup.decrypt(&write, &write),
        Err(LtsError::WrongRecordKind {
            expected: ContractKind::Read,
            ..
        })
    ));
    assert!(matches!(
        setup.cluster.create_lts(&write),
        Err(LtsError::WrongRecordKind {
            expected: ContractKind::LongTermSecret,
            ..
        })
    ));
}

#[test]
fn test_concurrent_decryptions() {
    let setup = Setup::new(4, 0..4);
    let requests: Vec<_> = (0..4)
        .map(|i| {
            let key = format!("key {i}");
            let write = setup.write(key.as_bytes());
            let (read, xc) = setup.read(&write);
            (key, write, read, xc)
        })
        .collect();

    let recovered = Parallel::new()
        .each(requests.iter(), |(key, write, read, xc)| {
            let reply = setup.decrypt(write, read).unwrap();
            reply.recover_key(xc).unwrap() == key.as_bytes()
        })
        .run();
    assert_eq!(recovered, vec![true; 4]);
}

#[test]
fn test_decryption_during_reshare() {
    let setup = Setup::new(5, 0..5);
    let requests: Vec<_> = (0..6)
        .map(|i| {
            let key = format!("key {i}");
            let write = setup.write(key.as_bytes());
            let (read, xc) = setup.read(&write);
            (key, write, read, xc)
        })
        .collect();
    let info = LtsInstanceInfo {
        roster: setup.cluster.roster(1..5),
    };
    let proof = setup.submit(|c| Instruction::reshare_lts(setup.lts, &info, c));

    let (recovered, reshared) = Parallel::new()
        .each(requests.iter(), |(key, write, read, xc)| {
            match setup.decrypt(write, read) {
                Ok(reply) => reply.recover_key(xc).unwrap() == key.as_bytes(),
                Err(e) => panic!("decryption failed during reshare: {e}"),
            }
        })
        .finish(|| setup.cluster.reshare_lts(&proof));
    assert_eq!(recovered, vec![true; 6]);
    assert_eq!(reshared.unwrap().epoch, 1);
    assert!(setup.public(0).is_none());

    let (_, write, read, xc) = &requests[0];
    let reply = setup.decrypt(write, read).unwrap();
    assert_eq!(reply.recover_key(xc).unwrap(), b"key 0");
}

#[test]
fn test_concurrent_generation_keeps_one_key() {
    let config = config();
    let cluster = LocalCluster::<Secp256k1>::new(4, config);
    let ledger = MemoryLedger::<Secp256k1>::new();
    cluster.authorize(ledger.id());
    let info = LtsInstanceInfo {
        roster: cluster.roster(0..4),
    };
    let ix = Instruction::spawn_lts(InstanceId::default(), &info, 0);
    let lts = ledger.add_transaction(ix.into()).unwrap()[0];
    let proof = ledger.get_proof(&lts).unwrap();

    let results = Parallel::new()
        .each(0..3, |_| cluster.create_lts(&proof))
        .run();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(_) | Err(LtsError::InstanceExists(_)))));

    let public = |i: usize| cluster.node(i).lts_public(&ledger.id(), &lts).unwrap();
    let x = public(0).public_key();
    for i in 1..4 {
        assert_eq!(public(i).public_key(), x);
    }
}
