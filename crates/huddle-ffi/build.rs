fn main() {
    uniffi::generate_scaffolding("src/huddle.udl").expect("failed to generate UniFFI scaffolding");
}
