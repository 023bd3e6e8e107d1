mod helpers;

mod broker {
    mod lifecycle;
    mod remote;
}

mod supervisor {
    mod process;
}

mod relay {
    mod http;
}

mod server {
    mod http;
}
