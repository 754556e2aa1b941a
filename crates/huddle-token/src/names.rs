use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated room names.
const ROOM_NAME_LEN: usize = 5;

const ADJECTIVES: &[&str] = &[
    "Amber", "Bold", "Brisk", "Calm", "Clever", "Eager", "Gentle", "Keen", "Lively", "Lucky",
    "Mellow", "Quiet", "Rapid", "Sunny", "Vivid", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Falcon", "Gecko", "Heron", "Ibis", "Lynx", "Marmot", "Otter", "Panda", "Puffin",
    "Quokka", "Raven", "Seal", "Tapir", "Walrus", "Wren",
];

/// Random alphanumeric room name.
pub fn room_name() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_NAME_LEN)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect()
}

/// Random friendly display name for a caller.
pub fn identity() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let animal = ANIMALS[rng.gen_range(0..ANIMALS.len())];
    format!("{adjective} {animal}")
}
