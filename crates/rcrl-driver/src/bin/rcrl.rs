fn main() -> anyhow::Result<()> {
    rcrl_driver::main()
}
