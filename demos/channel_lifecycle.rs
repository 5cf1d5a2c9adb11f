//! Two wallets open, fund, update and close a channel on an in-memory chain.
//!
//! Messages are protobuf encoded and routed through an mpsc channel.
//! Run with `RUST_LOG=debug` to see what the wallets do.

use std::sync::{mpsc, Arc};

use nitro::{
    chain::InMemoryChain,
    channel::{AllocationItem, Outcome, Participant},
    config::WalletConfig,
    repository::MemoryRepository,
    sig::Signer,
    wallet::Wallet,
    wire::{decode_message, BytesBus, ProtoBufEncodingLayer},
    Address, Hash, U256,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

const PARTICIPANTS: [&str; 2] = ["Alice", "Bob"];
const ASSET_HOLDER: Address = Address([0x55; 20]);

/// Byte transport, prints everything it sends.
#[derive(Debug)]
struct Bus {
    participant: usize,
    tx: Mutex<mpsc::Sender<(String, Vec<u8>)>>,
}

impl BytesBus for Bus {
    fn send_to(&self, recipient: &str, msg: &[u8]) {
        println!("{}->{}: {} bytes", PARTICIPANTS[self.participant], recipient, msg.len());
        // The receiver lives as long as main.
        let _ = self.tx.lock().send((recipient.to_string(), msg.to_vec()));
    }
}

type DemoWallet = Wallet<MemoryRepository, ProtoBufEncodingLayer<Bus>, InMemoryChain>;

/// Helper macro to print significant places in the protocol.
macro_rules! print_bold {
    ($($arg:tt)*) => {
        print!("\x1b[1m");
        print!($($arg)*);
        println!("\x1b[0m");
    };
}

/// Deliver everything sent so far.
fn deliver(rx: &mpsc::Receiver<(String, Vec<u8>)>, wallets: &[DemoWallet]) {
    while let Ok((recipient, bytes)) = rx.try_recv() {
        let msg = decode_message(&bytes).unwrap();
        let idx = PARTICIPANTS.iter().position(|p| *p == recipient).unwrap();
        for result in wallets[idx].push_message(msg).unwrap() {
            println!(
                "{} sees channel at turn {}: {:?}",
                recipient, result.turn_num, result.status
            );
        }
    }
}

fn status(wallets: &[DemoWallet], id: Hash) {
    for (name, wallet) in PARTICIPANTS.iter().zip(wallets) {
        let state = wallet.get_state(id).unwrap();
        println!("{name}: turn {} {:?}", state.turn_num, state.status);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = rand::thread_rng();
    let signers: Vec<_> = PARTICIPANTS.iter().map(|_| Signer::new(&mut rng)).collect();
    let participants: Vec<_> = PARTICIPANTS
        .iter()
        .zip(&signers)
        .map(|(name, s)| Participant {
            signing_address: s.address(),
            destination: s.address().into(),
            participant_id: name.to_string(),
        })
        .collect();

    let config = WalletConfig {
        block_confirmations: 0,
        asset_holder: ASSET_HOLDER,
        ..Default::default()
    };
    let chain = Arc::new(InMemoryChain::new(Address([0xcc; 20]), 0));
    let (tx, rx) = mpsc::channel();
    let wallets: Vec<DemoWallet> = signers
        .iter()
        .enumerate()
        .map(|(i, s)| {
            Wallet::new(
                s.clone(),
                config.clone(),
                Arc::new(MemoryRepository::new()),
                ProtoBufEncodingLayer::new(Bus {
                    participant: i,
                    tx: Mutex::new(tx.clone()),
                }),
                chain.clone(),
            )
        })
        .collect();
    let allocation = |amounts: [u64; 2]| {
        Outcome::simple(
            ASSET_HOLDER,
            participants
                .iter()
                .zip(amounts)
                .map(|(p, a)| AllocationItem {
                    destination: p.destination,
                    amount: U256::from(a),
                })
                .collect(),
        )
    };

    print_bold!("Alice proposes a channel");
    let id = wallets[0]
        .create_channel(participants.clone(), allocation([10, 10]), Address([0xaa; 20]), vec![])
        .unwrap()
        .channel_id;
    deliver(&rx, &wallets);

    print_bold!("Bob joins");
    wallets[1].join_channel(id).unwrap();
    deliver(&rx, &wallets);

    print_bold!("Both deposit");
    for wallet in &wallets {
        wallet.fund_channel(id).await.unwrap();
    }
    println!("Held on chain: {}", chain.holdings(id, ASSET_HOLDER));
    for wallet in &wallets {
        wallet.confirm_funding(id).unwrap();
    }
    deliver(&rx, &wallets);
    status(&wallets, id);

    print_bold!("Alice pays Bob 4");
    wallets[0]
        .update_channel(id, allocation([6, 14]), vec![])
        .unwrap();
    deliver(&rx, &wallets);

    print_bold!("Bob closes, Alice countersigns");
    wallets[1].close_channel(id).unwrap();
    deliver(&rx, &wallets);
    deliver(&rx, &wallets);
    status(&wallets, id);

    print_bold!("Alice concludes on chain");
    wallets[0].conclude_and_withdraw(id).await.unwrap();
    for (name, p) in PARTICIPANTS.iter().zip(&participants) {
        println!("{name} received {}", chain.balance(ASSET_HOLDER, p.destination));
    }
}
